use crate::dispatch::queue::{DispatchQueue, MoveRequest, RequestSource};
use crate::entities::item::Serial;
use crate::world::position::{DropPoint, Position};
use crate::world::state::WorldLookup;
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

/// Trade window drops land at a random offset up to this many pixels so
/// items do not stack on one spot.
pub const TRADE_JITTER: u16 = 20;

/// Where a batch of selected items is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Container(Serial),
    /// z is raised by each item's static height.
    Ground(Position),
    /// The container of an open secure-trade window.
    Trade(Serial),
}

/// User-curated set of items plus the order they were picked in.
///
/// The order queue is only a hint: an entry there may have been deselected
/// since, so the mark map is always re-checked.
#[derive(Debug, Default)]
pub struct SelectionSet {
    marks: Mutex<HashMap<Serial, bool>>,
    order: Mutex<VecDeque<Serial>>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when already selected.
    pub fn mark(&self, serial: Serial) -> bool {
        let previous = self.marks().insert(serial, true);
        previous != Some(true)
    }

    /// Flips the mark under one lock; returns the new state.
    pub fn toggle(&self, serial: Serial) -> bool {
        let mut marks = self.marks();
        if marks.remove(&serial).unwrap_or(false) {
            return false;
        }
        marks.insert(serial, true);
        true
    }

    /// Returns false when it was not selected.
    pub fn unmark(&self, serial: Serial) -> bool {
        self.marks().remove(&serial).unwrap_or(false)
    }

    pub fn is_selected(&self, serial: Serial) -> bool {
        self.marks().get(&serial).copied().unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.marks().values().filter(|selected| **selected).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn selected(&self) -> Vec<Serial> {
        let mut serials: Vec<Serial> = self
            .marks()
            .iter()
            .filter(|(_, selected)| **selected)
            .map(|(serial, _)| *serial)
            .collect();
        serials.sort();
        serials
    }

    fn push_order(&self, serial: Serial) {
        self.order().push_back(serial);
    }

    fn drain_order(&self) -> Vec<Serial> {
        self.order().drain(..).collect()
    }

    pub fn clear(&self) {
        self.marks().clear();
        self.order().clear();
    }

    fn marks(&self) -> MutexGuard<'_, HashMap<Serial, bool>> {
        self.marks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn order(&self) -> MutexGuard<'_, VecDeque<Serial>> {
        self.order.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Moves a hand-picked batch of items to one destination through the
/// shared dispatch queue.
///
/// Items picked before a destination is chosen wait in selection order;
/// choosing a destination opens a session and releases them. The
/// destination is read again for every dispatch, so switching it only
/// affects items still pending.
pub struct SelectionDispatcher {
    world: Arc<dyn WorldLookup>,
    queue: Arc<DispatchQueue>,
    selection: SelectionSet,
    destination: RwLock<Option<Destination>>,
    pending: AtomicUsize,
    active: AtomicBool,
}

impl SelectionDispatcher {
    pub fn new(world: Arc<dyn WorldLookup>, queue: Arc<DispatchQueue>) -> Self {
        Self {
            world,
            queue,
            selection: SelectionSet::new(),
            destination: RwLock::new(None),
            pending: AtomicUsize::new(0),
            active: AtomicBool::new(false),
        }
    }

    /// Selects an unselected item (returns true) or deselects a selected
    /// one (returns false). A deselected item already queued stays queued
    /// and is skipped when its turn comes.
    pub fn toggle_select(&self, serial: Serial) -> bool {
        if !self.selection.toggle(serial) {
            return false;
        }
        if self.destination().is_some() {
            self.forward(serial);
        } else {
            self.selection.push_order(serial);
        }
        true
    }

    /// Selects every listed item that is not yet selected.
    pub fn select_many(&self, serials: impl IntoIterator<Item = Serial>) -> usize {
        serials
            .into_iter()
            .filter(|serial| !self.selection.is_selected(*serial))
            .filter(|serial| self.toggle_select(*serial))
            .count()
    }

    pub fn is_selected(&self, serial: Serial) -> bool {
        self.selection.is_selected(serial)
    }

    pub fn selected(&self) -> Vec<Serial> {
        self.selection.selected()
    }

    pub fn selected_count(&self) -> usize {
        self.selection.len()
    }

    pub fn destination(&self) -> Option<Destination> {
        *self.destination.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets or switches the destination and releases waiting items.
    pub fn set_destination(&self, destination: Destination) {
        *self.destination.write().unwrap_or_else(PoisonError::into_inner) = Some(destination);
        if !self.active.swap(true, Ordering::AcqRel) {
            tracing::info!(
                target: "lootkit::selection",
                ?destination,
                selected = self.selected_count(),
                "selection session opened"
            );
        }
        for serial in self.selection.drain_order() {
            if self.selection.is_selected(serial) {
                self.forward(serial);
            }
        }
    }

    /// Targets the currently open trade window, if there is one.
    pub fn set_trade_destination(&self) -> bool {
        match self.world.trade_container() {
            Some(container) => {
                self.set_destination(Destination::Trade(container));
                true
            }
            None => false,
        }
    }

    fn forward(&self, serial: Serial) {
        let amount = self.world.item(serial).map_or(0, |item| item.amount);
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.queue.enqueue(MoveRequest::new(
            serial,
            Serial::NONE,
            amount,
            RequestSource::Selection,
        ));
    }

    /// Dispatch-time validation and destination resolution.
    pub fn resolve(&self, request: MoveRequest) -> Option<MoveRequest> {
        if !self.selection.is_selected(request.serial) {
            return None;
        }
        let destination = self.destination()?;
        let Some(item) = self.world.item(request.serial) else {
            self.selection.unmark(request.serial);
            return None;
        };
        let (target, point) = match destination {
            Destination::Container(container) => {
                self.world.item(container)?;
                (container, DropPoint::DEFAULT)
            }
            Destination::Ground(position) => {
                let z = position.z.saturating_add(item.height.min(i8::MAX as u8) as i8);
                (Serial::NONE, DropPoint::new(position.x, position.y, z))
            }
            Destination::Trade(container) => {
                if self.world.trade_container() != Some(container) {
                    return None;
                }
                let mut rng = rand::thread_rng();
                let point = DropPoint::new(
                    rng.gen_range(0..=TRADE_JITTER),
                    rng.gen_range(0..=TRADE_JITTER),
                    0,
                );
                (container, point)
            }
        };
        Some(MoveRequest {
            destination: target,
            amount: item.amount,
            point,
            ..request
        })
    }

    /// A moved item leaves the selection. So does one whose request was
    /// dropped while still selected, since its destination is gone and
    /// nothing would ever send it again.
    pub fn finished(&self, request: &MoveRequest, dispatched: bool) {
        let _ = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| {
                pending.checked_sub(1)
            });
        if self.selection.unmark(request.serial) && !dispatched {
            tracing::debug!(
                target: "lootkit::selection",
                serial = %request.serial,
                "destination unavailable, item deselected"
            );
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Ends the session once nothing is pending and nothing is selected.
    /// Returns true on the frame the session closes.
    pub fn maintain(&self) -> bool {
        if !self.is_active() || self.pending() > 0 || !self.selection.is_empty() {
            return false;
        }
        self.reset();
        tracing::info!(target: "lootkit::selection", "selection session closed");
        true
    }

    /// Deselects everything; queued requests are skipped as they come up.
    pub fn clear_selection(&self) {
        self.selection.clear();
    }

    /// Drops pending requests and ends the session immediately.
    pub fn cancel(&self) -> usize {
        let removed = self.queue.clear_source(RequestSource::Selection);
        self.pending.store(0, Ordering::Release);
        self.selection.clear();
        self.reset();
        removed.len()
    }

    fn reset(&self) {
        *self.destination.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.active.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::queue::DispatchHook;
    use crate::entities::item::ItemInfo;
    use crate::net::protocol::{ProtocolCall, RecordingProtocol};
    use crate::world::state::WorldState;

    const BAG: Serial = Serial(0x4000_0001);

    struct Hook<'a>(&'a SelectionDispatcher);

    impl DispatchHook for Hook<'_> {
        fn resolve(&self, request: MoveRequest) -> Option<MoveRequest> {
            self.0.resolve(request)
        }

        fn finished(&self, request: &MoveRequest, dispatched: bool) {
            self.0.finished(request, dispatched);
        }
    }

    fn setup() -> (Arc<WorldState>, Arc<DispatchQueue>, SelectionDispatcher) {
        let world = Arc::new(WorldState::new());
        world.insert(ItemInfo::new(BAG, 0x0E75).at(Position::new(10, 10, 0)));
        for serial in 1..=5 {
            world.insert(
                ItemInfo::new(Serial(serial), 0x0F3F)
                    .with_amount(serial as u16)
                    .inside(Serial(0x4000_0999)),
            );
        }
        let queue = Arc::new(DispatchQueue::new(0));
        let dispatcher = SelectionDispatcher::new(
            Arc::clone(&world) as Arc<dyn WorldLookup>,
            Arc::clone(&queue),
        );
        (world, queue, dispatcher)
    }

    fn drain(
        queue: &DispatchQueue,
        dispatcher: &SelectionDispatcher,
        protocol: &RecordingProtocol,
    ) {
        let hook = Hook(dispatcher);
        for now in 0..64 {
            queue.process_tick(now, false, protocol, &hook);
            dispatcher.maintain();
        }
    }

    #[test]
    fn toggle_reports_new_state() {
        let (_, _, dispatcher) = setup();
        assert!(dispatcher.toggle_select(Serial(1)));
        assert!(dispatcher.is_selected(Serial(1)));
        assert!(!dispatcher.toggle_select(Serial(1)));
        assert!(!dispatcher.is_selected(Serial(1)));
    }

    #[test]
    fn items_wait_for_destination_then_go_in_selection_order() {
        let (_, queue, dispatcher) = setup();
        for serial in [3, 1, 2] {
            dispatcher.toggle_select(Serial(serial));
        }
        assert!(queue.is_empty());

        dispatcher.set_destination(Destination::Container(BAG));
        assert_eq!(dispatcher.pending(), 3);

        let protocol = RecordingProtocol::new();
        drain(&queue, &dispatcher, &protocol);
        assert_eq!(protocol.dropped(), vec![Serial(3), Serial(1), Serial(2)]);
        assert!(protocol.calls().contains(&ProtocolCall::PickUp {
            serial: Serial(3),
            amount: 3
        }));
        assert!(!dispatcher.is_active());
        assert_eq!(dispatcher.selected_count(), 0);
    }

    #[test]
    fn deselected_item_is_never_sent() {
        let (_, queue, dispatcher) = setup();
        dispatcher.set_destination(Destination::Container(BAG));
        dispatcher.toggle_select(Serial(1));
        dispatcher.toggle_select(Serial(2));
        dispatcher.toggle_select(Serial(1));
        assert_eq!(queue.len(), 2);

        let protocol = RecordingProtocol::new();
        drain(&queue, &dispatcher, &protocol);
        assert_eq!(protocol.dropped(), vec![Serial(2)]);
        assert!(protocol.calls().iter().all(|call| call.serial() != Serial(1)));
    }

    #[test]
    fn reselect_while_queued_sends_once() {
        let (_, queue, dispatcher) = setup();
        dispatcher.set_destination(Destination::Container(BAG));
        dispatcher.toggle_select(Serial(1));
        dispatcher.toggle_select(Serial(1));
        dispatcher.toggle_select(Serial(1));
        assert_eq!(queue.len(), 2);

        let protocol = RecordingProtocol::new();
        drain(&queue, &dispatcher, &protocol);
        assert_eq!(protocol.dropped(), vec![Serial(1)]);
    }

    #[test]
    fn ground_destination_raises_z_by_item_height() {
        let (world, queue, dispatcher) = setup();
        let mut tall = ItemInfo::new(Serial(9), 0x0A2A).inside(Serial(0x4000_0999));
        tall.height = 6;
        world.insert(tall);
        dispatcher.toggle_select(Serial(9));
        dispatcher.toggle_select(Serial(1));
        dispatcher.set_destination(Destination::Ground(Position::new(200, 300, 5)));

        let protocol = RecordingProtocol::new();
        drain(&queue, &dispatcher, &protocol);
        let drops: Vec<ProtocolCall> = protocol
            .calls()
            .into_iter()
            .filter(|call| matches!(call, ProtocolCall::Drop { .. }))
            .collect();
        assert_eq!(
            drops,
            vec![
                ProtocolCall::Drop {
                    serial: Serial(9),
                    point: DropPoint::new(200, 300, 11),
                    destination: Serial::NONE,
                },
                ProtocolCall::Drop {
                    serial: Serial(1),
                    point: DropPoint::new(200, 300, 5),
                    destination: Serial::NONE,
                },
            ]
        );
    }

    #[test]
    fn trade_drops_are_jittered_inside_window() {
        let (world, queue, dispatcher) = setup();
        let trade = Serial(0x4000_0777);
        world.set_trade_container(Some(trade));
        dispatcher.select_many((1..=5).map(Serial));
        assert!(dispatcher.set_trade_destination());

        let protocol = RecordingProtocol::new();
        drain(&queue, &dispatcher, &protocol);
        let mut drops = 0;
        for call in protocol.calls() {
            if let ProtocolCall::Drop {
                point, destination, ..
            } = call
            {
                drops += 1;
                assert_eq!(destination, trade);
                assert!(point.x <= TRADE_JITTER && point.y <= TRADE_JITTER);
            }
        }
        assert_eq!(drops, 5);
    }

    #[test]
    fn closed_trade_drops_remaining_items() {
        let (world, queue, dispatcher) = setup();
        world.set_trade_container(Some(Serial(0x4000_0777)));
        dispatcher.select_many([Serial(1), Serial(2)]);
        dispatcher.set_trade_destination();
        world.set_trade_container(None);

        let protocol = RecordingProtocol::new();
        drain(&queue, &dispatcher, &protocol);
        assert!(protocol.calls().is_empty());
        assert_eq!(dispatcher.selected_count(), 0);
        assert_eq!(dispatcher.pending(), 0);
        assert!(!dispatcher.is_active());

        // A new destination has nothing left to send.
        dispatcher.set_destination(Destination::Container(BAG));
        drain(&queue, &dispatcher, &protocol);
        assert!(protocol.calls().is_empty());
    }

    #[test]
    fn vanished_container_ends_the_session() {
        let (world, queue, dispatcher) = setup();
        dispatcher.select_many([Serial(1), Serial(2)]);
        dispatcher.set_destination(Destination::Container(BAG));
        world.remove(BAG);

        let protocol = RecordingProtocol::new();
        drain(&queue, &dispatcher, &protocol);
        assert!(protocol.calls().is_empty());
        assert!(!dispatcher.is_selected(Serial(1)));
        assert!(!dispatcher.is_selected(Serial(2)));
        assert_eq!(dispatcher.pending(), 0);
        assert!(!dispatcher.is_active());
    }

    #[test]
    fn concurrent_toggles_alternate_the_mark() {
        let (_, _, dispatcher) = setup();
        let dispatcher = Arc::new(dispatcher);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let dispatcher = Arc::clone(&dispatcher);
                std::thread::spawn(move || {
                    (0..250)
                        .filter(|_| dispatcher.selection.toggle(Serial(1)))
                        .count()
                })
            })
            .collect();
        let selected: usize = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .sum();
        // 2000 flips from unselected: exactly half of them selected.
        assert_eq!(selected, 1000);
        assert!(!dispatcher.is_selected(Serial(1)));
    }

    #[test]
    fn switching_destination_affects_only_pending_items() {
        let (world, queue, dispatcher) = setup();
        let other = Serial(0x4000_0002);
        world.insert(ItemInfo::new(other, 0x0E75).at(Position::new(11, 10, 0)));
        dispatcher.select_many([Serial(1), Serial(2)]);
        dispatcher.set_destination(Destination::Container(BAG));

        let protocol = RecordingProtocol::new();
        let hook = Hook(&dispatcher);
        queue.process_tick(0, false, &protocol, &hook);
        dispatcher.set_destination(Destination::Container(other));
        queue.process_tick(1, false, &protocol, &hook);

        let targets: Vec<Serial> = protocol
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                ProtocolCall::Drop { destination, .. } => Some(destination),
                _ => None,
            })
            .collect();
        assert_eq!(targets, vec![BAG, other]);
    }

    #[test]
    fn vanished_item_is_dropped_silently() {
        let (world, queue, dispatcher) = setup();
        dispatcher.select_many([Serial(1), Serial(2)]);
        dispatcher.set_destination(Destination::Container(BAG));
        world.remove(Serial(1));

        let protocol = RecordingProtocol::new();
        drain(&queue, &dispatcher, &protocol);
        assert_eq!(protocol.dropped(), vec![Serial(2)]);
        assert!(!dispatcher.is_active());
    }

    #[test]
    fn session_stays_open_while_items_remain_selected() {
        let (_, _, dispatcher) = setup();
        dispatcher.toggle_select(Serial(2));
        dispatcher.set_destination(Destination::Container(BAG));
        dispatcher.toggle_select(Serial(1));
        dispatcher.toggle_select(Serial(1));
        dispatcher.toggle_select(Serial(2));
        // Both deselected but still queued.
        assert_eq!(dispatcher.selected_count(), 0);
        assert!(!dispatcher.maintain());
        assert!(dispatcher.is_active());
    }

    #[test]
    fn cancel_clears_everything() {
        let (_, queue, dispatcher) = setup();
        dispatcher.select_many([Serial(1), Serial(2)]);
        dispatcher.set_destination(Destination::Container(BAG));
        assert_eq!(dispatcher.cancel(), 2);
        assert!(queue.is_empty());
        assert_eq!(dispatcher.pending(), 0);
        assert!(!dispatcher.is_active());
        assert_eq!(dispatcher.destination(), None);
    }
}
