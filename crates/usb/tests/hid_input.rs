//! HID keyboard and mouse driven through the mock host controller.

use std::sync::{Arc, Mutex};

use cdi::mock::{ConfigBuilder, MockDevice, MockHostController, MockReply, device_descriptor, init_test_env};
use cdi::usb::{TransferEngine, TransferRequest, TransferStatus, UsbBus, UsbSpeed};
use cdi::{Cdi, InputSink, KeyCode, MouseButton, UsbConfig};
use usb::hid::HidInterface;
use usb::hid::keyboard::Leds;
use usb::HidKind;

const HID_DESCRIPTOR: [u8; 9] = [0x09, 0x21, 0x11, 0x01, 0x00, 0x01, 0x22, 0x3F, 0x00];

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Key(KeyCode, bool),
    Move(i32, i32),
    Button(MouseButton, bool),
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

impl InputSink for Recorder {
    fn key_event(&self, key: KeyCode, pressed: bool) {
        self.events.lock().unwrap().push(Event::Key(key, pressed));
    }

    fn mouse_move(&self, dx: i32, dy: i32) {
        self.events.lock().unwrap().push(Event::Move(dx, dy));
    }

    fn mouse_button(&self, button: MouseButton, pressed: bool) {
        self.events.lock().unwrap().push(Event::Button(button, pressed));
    }
}

/// Class-side behaviour of the device model.
#[derive(Default)]
struct HidModel {
    stall_descriptor: bool,
    led_reports: Vec<u8>,
    class_requests: Vec<u8>,
}

impl HidModel {
    fn handle(&mut self, req: &TransferRequest) -> MockReply {
        let Some(setup) = req.setup else {
            // interrupt IN: completed by the test
            return MockReply::Defer;
        };
        match setup.request {
            0x06 if self.stall_descriptor => MockReply::Complete(TransferStatus::Stalled, Vec::new()),
            0x06 => {
                let mut data = HID_DESCRIPTOR.to_vec();
                data.truncate(setup.length as usize);
                MockReply::Complete(TransferStatus::Success, data)
            }
            0x09 => {
                self.led_reports.extend_from_slice(&req.data);
                MockReply::Complete(TransferStatus::Success, Vec::new())
            }
            request => {
                self.class_requests.push(request);
                MockReply::Complete(TransferStatus::Success, Vec::new())
            }
        }
    }
}

struct Rig {
    bus: Arc<UsbBus>,
    hc: Arc<MockHostController>,
    sink: Arc<Recorder>,
    model: Arc<Mutex<HidModel>>,
}

impl Rig {
    fn new(protocol: u8, endpoint: (u8, u16), model: HidModel) -> Self {
        init_test_env();
        let cdi = Cdi::new();
        let sink = Arc::new(Recorder::default());
        usb::register_class_drivers(&cdi, sink.clone(), usb::MsdConfig::default());

        let hc = MockHostController::new();
        let engine = TransferEngine::new(hc.clone());
        hc.attach_engine(&engine);
        let bus = UsbBus::new(cdi, engine, UsbConfig::default());

        let model = Arc::new(Mutex::new(model));
        let handler = model.clone();
        let config = ConfigBuilder::new(1)
            .interface(0, 0, 0x03, 0x01, protocol)
            .class_descriptor(&HID_DESCRIPTOR)
            .endpoint(endpoint.0, 0x03, endpoint.1, 10)
            .build();
        MockDevice::new(device_descriptor(0x046D, 0xC31C, 8), config)
            .with_class_handler(move |req| handler.lock().unwrap().handle(req))
            .install(&hc);

        Self {
            bus,
            hc,
            sink,
            model,
        }
    }

    /// Completes the pending interrupt poll with `report`.
    fn report(&self, report: &[u8]) {
        let key = self.hc.deferred()[0].key;
        assert!(self.hc.complete_next(key, TransferStatus::Success, report));
    }
}

#[test]
fn test_keyboard_press_release_and_rearm() {
    let rig = Rig::new(1, (0x81, 8), HidModel::default());
    let device = rig.bus.attach(1, UsbSpeed::Low).unwrap();
    let state = device.interfaces()[0].driver_data::<HidInterface>().unwrap();
    assert_eq!(state.kind(), HidKind::Keyboard);
    assert_eq!(state.descriptor().report_length, 63);
    // SET_PROTOCOL(boot) and SET_IDLE
    assert_eq!(rig.model.lock().unwrap().class_requests, [0x0B, 0x0A]);

    let poll = state.poll().unwrap();
    assert_eq!(rig.hc.deferred()[0].length, 8);

    rig.report(&[0, 0, 0x04, 0, 0, 0, 0, 0]);
    assert_eq!(rig.sink.take(), [Event::Key(KeyCode::A, true)]);
    assert_eq!(rig.hc.enqueue_count(poll), 2);
    assert_eq!(rig.hc.deferred_len(), 1);

    rig.report(&[0, 0, 0x04, 0, 0, 0, 0, 0]);
    assert!(rig.sink.take().is_empty());

    rig.report(&[0x02, 0, 0, 0, 0, 0, 0, 0]);
    assert_eq!(
        rig.sink.take(),
        [
            Event::Key(KeyCode::LEFTSHIFT, true),
            Event::Key(KeyCode::A, false)
        ]
    );
    assert_eq!(rig.hc.enqueue_count(poll), 4);
}

#[test]
fn test_caps_lock_sends_led_report() {
    let rig = Rig::new(1, (0x81, 8), HidModel::default());
    let device = rig.bus.attach(1, UsbSpeed::Full).unwrap();
    let state = device.interfaces()[0].driver_data::<HidInterface>().unwrap();

    rig.report(&[0, 0, 0x39, 0, 0, 0, 0, 0]);
    assert_eq!(rig.sink.take(), [Event::Key(KeyCode::CAPSLOCK, true)]);
    assert_eq!(state.leds(), Leds::CAPS_LOCK);
    assert_eq!(rig.model.lock().unwrap().led_reports, [0x02]);

    rig.report(&[0; 8]);
    rig.report(&[0, 0, 0x53, 0, 0, 0, 0, 0]);
    assert_eq!(state.leds(), Leds::CAPS_LOCK | Leds::NUM_LOCK);
    assert_eq!(rig.model.lock().unwrap().led_reports, [0x02, 0x03]);

    let led_request = rig
        .hc
        .requests()
        .into_iter()
        .filter_map(|r| r.setup)
        // SET_CONFIGURATION shares bRequest 0x09; SET_REPORT is a class request
        .find(|s| s.request == 0x09 && s.request_type == 0x21)
        .unwrap();
    assert_eq!(led_request.request_type, 0x21);
    assert_eq!(led_request.value, 0x0200);
    assert_eq!(led_request.index, 0);
    assert_eq!(led_request.length, 1);
}

#[test]
fn test_mouse_reports() {
    let rig = Rig::new(2, (0x81, 4), HidModel::default());
    let device = rig.bus.attach(1, UsbSpeed::Low).unwrap();
    let state = device.interfaces()[0].driver_data::<HidInterface>().unwrap();
    assert_eq!(state.kind(), HidKind::Mouse);
    assert_eq!(rig.hc.deferred()[0].length, 4);

    rig.report(&[0b001, 0xFF, 0x02, 0x00]);
    assert_eq!(
        rig.sink.take(),
        [
            Event::Move(-1, 2),
            Event::Button(MouseButton::Left, true),
            Event::Button(MouseButton::Right, false),
            Event::Button(MouseButton::Middle, false),
        ]
    );

    rig.report(&[0b010, 0x00, 0x00, 0x00]);
    assert_eq!(rig.sink.take()[2], Event::Button(MouseButton::Right, true));
}

#[test]
fn test_mouse_buffer_clamped_to_eight() {
    let rig = Rig::new(2, (0x81, 64), HidModel::default());
    rig.bus.attach(1, UsbSpeed::Full).unwrap();
    assert_eq!(rig.hc.deferred()[0].length, 8);
}

#[test]
fn test_detach_stops_polling() {
    let rig = Rig::new(1, (0x81, 8), HidModel::default());
    let device = rig.bus.attach(1, UsbSpeed::Low).unwrap();
    assert_eq!(rig.bus.engine().pending_count(device.address()), 1);

    rig.bus.detach(1).unwrap();
    assert_eq!(rig.bus.engine().pending_count(device.address()), 0);
    assert_eq!(rig.hc.deferred_len(), 0);
    assert!(rig.sink.take().is_empty());
}

#[test]
fn test_missing_interrupt_in_leaves_interface_unclaimed() {
    let rig = Rig::new(1, (0x01, 8), HidModel::default());
    let device = rig.bus.attach(1, UsbSpeed::Low).unwrap();
    assert!(!device.interfaces()[0].is_claimed());
    assert_eq!(rig.hc.deferred_len(), 0);
}

#[test]
fn test_unreadable_hid_descriptor_fails_setup() {
    let model = HidModel {
        stall_descriptor: true,
        ..HidModel::default()
    };
    let rig = Rig::new(1, (0x81, 8), model);
    let device = rig.bus.attach(1, UsbSpeed::Low).unwrap();
    let interfaces = device.interfaces();
    let interface = &interfaces[0];
    assert!(!interface.is_claimed());
    assert!(interface.driver_data::<HidInterface>().is_none());
    assert_eq!(rig.bus.engine().pending_count(device.address()), 0);
}
