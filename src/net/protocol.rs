use crate::entities::item::Serial;
use crate::net::packet::{PacketWriter, DROP_ITEM, DROP_ITEM_LEN, PICK_UP_ITEM, PICK_UP_ITEM_LEN};
use crate::world::position::DropPoint;
use crate::world::state::WorldState;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};

/// Outbound item-move calls. Fire-and-forget: the server never acknowledges
/// either message, so nothing here can report success.
pub trait Protocol: Send + Sync {
    fn pick_up(&self, serial: Serial, amount: u16);

    fn drop_item(&self, serial: Serial, point: DropPoint, destination: Serial);
}

/// One call observed at the protocol boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolCall {
    PickUp {
        serial: Serial,
        amount: u16,
    },
    Drop {
        serial: Serial,
        point: DropPoint,
        destination: Serial,
    },
}

impl ProtocolCall {
    pub fn serial(&self) -> Serial {
        match self {
            ProtocolCall::PickUp { serial, .. } | ProtocolCall::Drop { serial, .. } => *serial,
        }
    }
}

pub fn encode_pick_up(serial: Serial, amount: u16) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(PICK_UP_ITEM_LEN);
    writer.write_u8(PICK_UP_ITEM);
    writer.write_u32_be(serial.0);
    writer.write_u16_be(amount);
    writer.into_vec()
}

pub fn encode_drop(serial: Serial, point: DropPoint, destination: Serial) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(DROP_ITEM_LEN);
    writer.write_u8(DROP_ITEM);
    writer.write_u32_be(serial.0);
    writer.write_u16_be(point.x);
    writer.write_u16_be(point.y);
    writer.write_i8(point.z);
    // Container grid slot; 0 lets the client layout decide.
    writer.write_u8(0);
    writer.write_u32_be(destination.0);
    writer.into_vec()
}

/// Encodes calls into wire frames and hands them to the network writer.
pub struct PacketProtocol {
    outbound: Mutex<Sender<Vec<u8>>>,
}

impl PacketProtocol {
    pub fn new(outbound: Sender<Vec<u8>>) -> Self {
        Self {
            outbound: Mutex::new(outbound),
        }
    }

    fn send(&self, frame: Vec<u8>) {
        let sender = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        if sender.send(frame).is_err() {
            tracing::debug!(
                target: "lootkit::dispatch",
                "outbound channel closed, frame discarded"
            );
        }
    }
}

impl Protocol for PacketProtocol {
    fn pick_up(&self, serial: Serial, amount: u16) {
        self.send(encode_pick_up(serial, amount));
    }

    fn drop_item(&self, serial: Serial, point: DropPoint, destination: Serial) {
        self.send(encode_drop(serial, point, destination));
    }
}

/// Keeps every call in order; used by tests and the replay binary.
#[derive(Debug, Default)]
pub struct RecordingProtocol {
    calls: Mutex<Vec<ProtocolCall>>,
}

impl RecordingProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<ProtocolCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Serials that received a drop, in dispatch order.
    pub fn dropped(&self) -> Vec<Serial> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, ProtocolCall::Drop { .. }))
            .map(|call| call.serial())
            .collect()
    }

    fn record(&self, call: ProtocolCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

impl Protocol for RecordingProtocol {
    fn pick_up(&self, serial: Serial, amount: u16) {
        self.record(ProtocolCall::PickUp { serial, amount });
    }

    fn drop_item(&self, serial: Serial, point: DropPoint, destination: Serial) {
        self.record(ProtocolCall::Drop {
            serial,
            point,
            destination,
        });
    }
}

/// Records calls and applies each drop to an in-memory world, standing in
/// for a live server.
pub struct LoopbackProtocol {
    world: Arc<WorldState>,
    recorder: RecordingProtocol,
}

impl LoopbackProtocol {
    pub fn new(world: Arc<WorldState>) -> Self {
        Self {
            world,
            recorder: RecordingProtocol::new(),
        }
    }

    pub fn calls(&self) -> Vec<ProtocolCall> {
        self.recorder.calls()
    }
}

impl Protocol for LoopbackProtocol {
    fn pick_up(&self, serial: Serial, amount: u16) {
        self.recorder.pick_up(serial, amount);
    }

    fn drop_item(&self, serial: Serial, point: DropPoint, destination: Serial) {
        self.recorder.drop_item(serial, point, destination);
        if !self.world.apply_drop(serial, point, destination) {
            tracing::debug!(
                target: "lootkit::dispatch",
                %serial,
                %destination,
                "loopback drop rejected"
            );
        }
    }
}
