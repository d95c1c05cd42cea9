//! 通用有序列表
//!
//! 端点列表、接口列表、驱动注册表和磁盘表都建立在 [`List`] 之上。
//! 列表只保证插入顺序，不做排序；所有越界访问都返回显式的“不存在”结果。

use alloc::collections::VecDeque;
use core::ops::Index;

/// 按索引寻址的有序序列
///
/// `push`/`pop` 作用于表头：依次压入 `A, B, C` 后按索引读取得到 `C, B, A`。
///
/// 迭代期间不要修改正在迭代的列表（借用检查器会阻止这一点）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct List<T> {
    items: VecDeque<T>,
}

impl<T> List<T> {
    /// 创建空列表
    pub const fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    /// 在表头插入元素
    pub fn push(&mut self, value: T) {
        self.items.push_front(value);
    }

    /// 在表尾追加元素
    pub fn push_back(&mut self, value: T) {
        self.items.push_back(value);
    }

    /// 移除并返回表头元素，空列表返回 `None`
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// 在 `index` 处插入，后续元素索引加一
    ///
    /// `index == len()` 等价于追加。越界时原样返回 `value`。
    pub fn insert(&mut self, index: usize, value: T) -> Result<(), T> {
        if index > self.items.len() {
            return Err(value);
        }
        self.items.insert(index, value);
        Ok(())
    }

    /// 移除 `index` 处的元素，后续元素索引减一
    pub fn remove(&mut self, index: usize) -> Option<T> {
        self.items.remove(index)
    }

    /// 按索引读取
    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    /// 按索引可变读取
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.items.get_mut(index)
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 元素个数
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// 按索引顺序迭代
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    /// 查找第一个满足条件的元素的索引
    pub fn position(&self, pred: impl FnMut(&T) -> bool) -> Option<usize> {
        self.items.iter().position(pred)
    }

    /// 移除第一个满足条件的元素
    pub fn remove_first(&mut self, pred: impl FnMut(&T) -> bool) -> Option<T> {
        let index = self.position(pred)?;
        self.remove(index)
    }
}

impl<T> Default for List<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<usize> for List<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.items[index]
    }
}

impl<T> FromIterator<T> for List<T> {
    /// 按迭代顺序追加（不反转）
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl<'a, T> IntoIterator for &'a List<T> {
    type Item = &'a T;
    type IntoIter = alloc::collections::vec_deque::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn collect(list: &List<char>) -> Vec<char> {
        list.iter().copied().collect()
    }

    #[test]
    fn test_push_front_order() {
        let mut list = List::new();
        list.push('A');
        list.push('B');
        list.push('C');
        assert_eq!(collect(&list), ['C', 'B', 'A']);
        assert_eq!(list.get(0), Some(&'C'));
        assert_eq!(list.get(2), Some(&'A'));
        assert_eq!(list.get(3), None);
    }

    #[test]
    fn test_remove_shifts_indices() {
        let mut list = List::new();
        for c in ['A', 'B', 'C'] {
            list.push(c);
        }
        assert_eq!(list.remove(1), Some('B'));
        assert_eq!(collect(&list), ['C', 'A']);
        assert_eq!(list.len(), 2);
        assert_eq!(list.remove(2), None);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_pop_empty_returns_none() {
        let mut list: List<u32> = List::new();
        assert!(list.is_empty());
        assert_eq!(list.pop(), None);

        list.push(7);
        assert_eq!(list.pop(), Some(7));
        assert_eq!(list.pop(), None);
    }

    #[test]
    fn test_insert_bounds() {
        let mut list: List<u32> = [1, 3].into_iter().collect();
        assert_eq!(list.insert(1, 2), Ok(()));
        assert_eq!(list.insert(3, 4), Ok(()));
        assert_eq!(list.insert(9, 99), Err(99));
        assert_eq!(list.iter().copied().collect::<Vec<_>>(), [1, 2, 3, 4]);
    }

    #[test]
    fn test_remove_first_and_position() {
        let mut list: List<u32> = [5, 6, 7, 6].into_iter().collect();
        assert_eq!(list.position(|&v| v == 6), Some(1));
        assert_eq!(list.remove_first(|&v| v == 6), Some(6));
        assert_eq!(list.iter().copied().collect::<Vec<_>>(), [5, 7, 6]);
        assert_eq!(list.remove_first(|&v| v == 42), None);
    }
}
