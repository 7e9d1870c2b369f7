use std::{
    collections::{HashMap, HashSet},
    mem,
    path::PathBuf,
    sync::{
        Arc,
        mpsc::{Receiver, SyncSender, TryRecvError},
    },
};

use tracing::{debug, error, info, warn};
use wayland_client::{
    Connection, Dispatch, EventQueue, Proxy, QueueHandle, event_created_child,
    protocol::wl_registry,
};
use wayland_protocols_wlr::output_management::v1::client::{
    zwlr_output_configuration_head_v1::{self, ZwlrOutputConfigurationHeadV1},
    zwlr_output_configuration_v1::{self, ZwlrOutputConfigurationV1},
    zwlr_output_head_v1::{self, ZwlrOutputHeadV1},
    zwlr_output_manager_v1::{self, ZwlrOutputManagerV1},
    zwlr_output_mode_v1::{self, ZwlrOutputModeV1},
};

use crate::{
    action::ConfigurationAction,
    calculation::{self, CalculationResult},
    command::WlOutputCommand,
    config::{DisplayConfig, DisplayGroup},
    error::WlOutputError,
    meta_head::{MetaHead, machine_id},
    plan::{HeadEdit, TransactionPlan},
    proxy::{HeadChange, ModeChange},
    queue::ActionQueue,
    transaction::{ProxyRegistry, Transaction, TransactionOutcome},
    wl_output::{BindingId, WlOutput},
};

const MANAGER_VERSION: u32 = 4;

/// Events emitted by the output manager
#[derive(Debug)]
pub enum WlOutputEvent {
    /// Sent once when the initial state is received, containing all attached outputs
    InitialState(Vec<WlOutput>),
    /// Sent when an output's properties have changed
    Changed(Box<WlOutput>),
    /// Sent when an output is detached
    Removed { identifier: String, name: String },
    /// Sent after a queued batch was committed
    ConfigurationApplied { success: bool },
    /// Sent when a requested change could not be carried out
    ActionFailed { reason: String },
}

/// Startup options of the output manager
#[derive(Debug, Default)]
pub struct ManagerOptions {
    pub config: DisplayConfig,
    /// Where applied layouts are saved; nothing is saved when `None`
    pub config_path: Option<PathBuf>,
    /// Apply the saved group matching the attached outputs
    pub restore: bool,
}

/// Manages Wayland output state and communication
///
/// Owns the connection. Other threads reach it only through
/// [`WlOutputCommand`] messages, usually via a [`crate::WlOutputHandle`].
pub struct WlOutputManager {
    _conn: Connection,
    emitter: SyncSender<WlOutputEvent>,
    controller: Receiver<WlOutputCommand>,
    machine_id: Arc<str>,
    heads: Vec<MetaHead>,
    // Heads advertised since the last `done`
    fresh: Vec<BindingId>,
    changed: HashSet<BindingId>,
    proxies: ProxyRegistry,
    mode_heads: HashMap<BindingId, BindingId>,
    zwlr_manager: Option<ZwlrOutputManagerV1>,
    serial: Option<u32>,
    initialized: bool,
    outcome: TransactionOutcome,
    queue: ActionQueue,
    calculation: Option<CalculationResult>,
    options: ManagerOptions,
    pending_restore: Option<DisplayGroup>,
}

impl WlOutputManager {
    /// Create a new Wayland connection and output manager
    ///
    /// Returns the manager and the event queue to pass to [`WlOutputManager::run`].
    ///
    /// # Errors
    ///
    /// Returns `Connection` if unable to connect to the Wayland display and
    /// `ManagerUnavailable` if the compositor lacks output management.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use wlx_outputs::{ManagerOptions, WlOutputHandle, WlOutputManager};
    /// use std::sync::mpsc::sync_channel;
    ///
    /// let (tx, rx) = sync_channel(10);
    /// let (command_tx, command_rx) = sync_channel(10);
    ///
    /// let (manager, event_queue) =
    ///     WlOutputManager::new_connection(tx, command_rx, ManagerOptions::default()).unwrap();
    /// let handle = WlOutputHandle::new(command_tx);
    /// ```
    pub fn new_connection(
        emitter: SyncSender<WlOutputEvent>,
        controller: Receiver<WlOutputCommand>,
        options: ManagerOptions,
    ) -> Result<(Self, EventQueue<Self>), WlOutputError> {
        let conn = Connection::connect_to_env()
            .map_err(|e| WlOutputError::Connection(e.to_string()))?;

        let display_object = conn.display();
        let mut event_queue: EventQueue<WlOutputManager> =
            conn.new_event_queue();
        let queue_handler = event_queue.handle();
        display_object.get_registry(&queue_handler, ());

        let mut state = WlOutputManager {
            _conn: conn,
            emitter,
            controller,
            machine_id: Arc::from(machine_id()),
            heads: Vec::new(),
            fresh: Vec::new(),
            changed: HashSet::new(),
            proxies: ProxyRegistry::default(),
            mode_heads: HashMap::new(),
            zwlr_manager: None,
            serial: None,
            initialized: false,
            outcome: TransactionOutcome::Pending,
            queue: ActionQueue::new(),
            calculation: None,
            options,
            pending_restore: None,
        };

        event_queue
            .roundtrip(&mut state)
            .map_err(|e| WlOutputError::EventQueue(e.to_string()))?;
        if state.zwlr_manager.is_none() {
            return Err(WlOutputError::ManagerUnavailable);
        }

        Ok((state, event_queue))
    }

    /// Run the output manager event loop
    ///
    /// Blocks until every command sender is dropped or the connection
    /// fails. Run it in a separate thread.
    ///
    /// # Errors
    ///
    /// Returns `EventQueue` if there's an error in the Wayland event queue
    /// and `ManagerUnavailable` if the compositor withdraws output management.
    pub fn run(
        mut self,
        mut eq: EventQueue<Self>,
    ) -> Result<(), WlOutputError> {
        loop {
            eq.flush()
                .map_err(|e| WlOutputError::EventQueue(e.to_string()))?;

            if let Some(guard) = eq.prepare_read() {
                let fd = guard.connection_fd();
                let mut poll_fd = [rustix::event::PollFd::new(
                    &fd,
                    rustix::event::PollFlags::IN,
                )];
                let timeout = rustix::time::Timespec {
                    tv_sec: 0,
                    tv_nsec: 50_000_000,
                };
                let _ = rustix::event::poll(&mut poll_fd, Some(&timeout));
                let _ = guard.read();
            }
            eq.dispatch_pending(&mut self)
                .map_err(|e| WlOutputError::EventQueue(e.to_string()))?;
            self.flush_changed();

            if self.zwlr_manager.is_none() {
                return Err(WlOutputError::ManagerUnavailable);
            }

            if let Some(group) = self.pending_restore.take() {
                self.restore_group(&group, &mut eq);
            }

            match self.controller.try_recv() {
                Ok(command) => self.handle_command(command, &mut eq),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    info!("command channel closed, stopping output manager");
                    return Ok(());
                }
            }
        }
    }

    fn emit(&self, event: WlOutputEvent) {
        let _ = self.emitter.send(event);
    }

    fn flush_changed(&mut self) {
        if !self.initialized || self.changed.is_empty() {
            return;
        }
        let (waiting, ready): (HashSet<_>, HashSet<_>) =
            mem::take(&mut self.changed)
                .into_iter()
                .partition(|b| self.fresh.contains(b));
        self.changed = waiting;

        for head in &self.heads {
            if head.binding().is_some_and(|b| ready.contains(&b)) {
                self.emit(WlOutputEvent::Changed(Box::new(head.snapshot())));
            }
        }
    }

    fn head_by_binding(&mut self, binding: BindingId) -> Option<&mut MetaHead> {
        self.heads
            .iter_mut()
            .find(|h| h.binding() == Some(binding))
    }

    fn live_head(&self, identifier: &str) -> Result<&MetaHead, WlOutputError> {
        let head = self
            .heads
            .iter()
            .filter(|h| !h.is_advertising())
            .find(|h| h.identifier() == identifier)
            .ok_or_else(|| {
                WlOutputError::OutputMissing(identifier.to_string())
            })?;
        if !head.is_available() {
            let identifier = identifier.to_string();
            return Err(WlOutputError::OutputUnavailable(identifier));
        }
        Ok(head)
    }

    fn live_identifiers(&self) -> Vec<&str> {
        self.heads
            .iter()
            .filter(|h| h.is_available())
            .map(MetaHead::identifier)
            .collect()
    }

    /// Folds the heads advertised since the last `done` into the known
    /// set: re-attaches returning outputs and evicts detached ones.
    fn reconcile(&mut self) {
        let mut attached = false;
        for binding in mem::take(&mut self.fresh) {
            let Some(index) = self
                .heads
                .iter()
                .position(|h| h.binding() == Some(binding))
            else {
                continue;
            };
            attached = true;
            self.heads[index].complete_advertisement();
            let identifier = self.heads[index].identifier().to_string();
            let previous = self
                .heads
                .iter()
                .position(|h| {
                    h.binding().is_none() && h.identifier() == identifier
                });
            if let Some(previous) = previous {
                let newer = self.heads.remove(index);
                let previous =
                    if previous > index { previous - 1 } else { previous };
                self.heads[previous].reattach(newer);
            } else {
                info!(
                    output = %self.heads[index].name(),
                    %identifier,
                    "output attached"
                );
            }
            self.changed.insert(binding);
        }

        let (gone, kept): (Vec<_>, Vec<_>) = mem::take(&mut self.heads)
            .into_iter()
            .partition(|h| !h.is_available());
        self.heads = kept;
        let detached = !gone.is_empty();
        for head in gone {
            // Finished before its first `done`, never announced
            if head.is_advertising() {
                continue;
            }
            info!(
                output = %head.name(),
                identifier = %head.identifier(),
                "output removed"
            );
            if self.initialized {
                self.emit(WlOutputEvent::Removed {
                    identifier: head.identifier().to_string(),
                    name: head.name().to_string(),
                });
            }
        }

        if self.initialized && (attached || detached) {
            self.select_group();
        }
    }

    fn initialize(&mut self) {
        self.initialized = true;
        self.select_group();
        self.changed.clear();

        let outputs = self.heads.iter().map(MetaHead::snapshot).collect();
        self.emit(WlOutputEvent::InitialState(outputs));
    }

    // Restores the saved group for the attached outputs, if there is one.
    fn select_group(&mut self) {
        let Some(group) = self
            .options
            .config
            .matching_group(self.live_identifiers())
            .cloned()
        else {
            debug!("no saved display group matches the attached outputs");
            return;
        };
        info!(group = %group.name, "found saved display group");
        group.restore_onto(
            self.heads.iter_mut().filter(|h| !h.is_advertising()),
        );
        if self.options.restore {
            self.pending_restore = Some(group);
        }
    }

    fn restore_group(
        &mut self,
        group: &DisplayGroup,
        eq: &mut EventQueue<Self>,
    ) {
        let result = TransactionPlan::from_group(group, &self.heads)
            .and_then(|plan| self.commit_plan(&plan, eq));
        match result {
            Ok(()) => info!(group = %group.name, "restored display group"),
            Err(e) => {
                warn!(
                    group = %group.name,
                    error = %e,
                    "failed to restore display group"
                );
                self.emit(WlOutputEvent::ActionFailed {
                    reason: e.to_string(),
                });
            }
        }
    }

    fn handle_command(
        &mut self,
        command: WlOutputCommand,
        eq: &mut EventQueue<Self>,
    ) {
        match command {
            WlOutputCommand::Outputs { reply } => {
                let outputs = self
                    .heads
                    .iter()
                    .filter(|h| h.is_available())
                    .map(MetaHead::snapshot)
                    .collect();
                let _ = reply.send(Ok(outputs));
            }
            WlOutputCommand::Modes { identifier, reply } => {
                let modes =
                    self.live_head(&identifier).map(|h| h.snapshot().modes);
                let _ = reply.send(modes);
            }
            WlOutputCommand::Output { identifier, reply } => {
                let output =
                    self.live_head(&identifier).map(MetaHead::snapshot);
                let _ = reply.send(output);
            }
            WlOutputCommand::SetEnabled {
                identifier,
                enabled,
                reply,
            } => {
                let edit = HeadEdit::Enabled(enabled);
                let _ = reply.send(self.edit(&identifier, edit, eq));
            }
            WlOutputCommand::SetMode {
                identifier,
                width,
                height,
                refresh,
                reply,
            } => {
                let edit = HeadEdit::Mode {
                    width,
                    height,
                    refresh,
                };
                let _ = reply.send(self.edit(&identifier, edit, eq));
            }
            WlOutputCommand::SetPosition {
                identifier,
                position,
                reply,
            } => {
                let edit = HeadEdit::Position(position);
                let _ = reply.send(self.edit(&identifier, edit, eq));
            }
            WlOutputCommand::QueueAction { action, reply } => {
                let _ = reply.send(self.queue_action(action));
            }
            WlOutputCommand::RemoveAction {
                identifier,
                kind,
                reply,
            } => {
                let removed = self.queue.remove(&identifier, kind);
                if removed {
                    self.calculation = None;
                }
                let _ = reply.send(Ok(removed));
            }
            WlOutputCommand::PendingActions { reply } => {
                let _ = reply.send(Ok(self.queue.actions().to_vec()));
            }
            WlOutputCommand::Calculate { reply } => {
                let _ = reply.send(Ok(self.calculate().clone()));
            }
            WlOutputCommand::Apply { reply } => {
                let _ = reply.send(self.apply(eq));
            }
            WlOutputCommand::Reset { reply } => {
                self.queue.reset();
                self.calculation = None;
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn queue_action(
        &mut self,
        action: ConfigurationAction,
    ) -> Result<(), WlOutputError> {
        self.live_head(action.output())?;
        action.validate()?;
        self.queue.add(action);
        self.calculation = None;
        Ok(())
    }

    /// Layout for the queued actions, reused until the queue or the
    /// attached outputs change.
    fn calculate(&mut self) -> &CalculationResult {
        self.calculation.get_or_insert_with(|| {
            calculation::calculate(&self.heads, &self.queue)
        })
    }

    fn edit(
        &mut self,
        identifier: &str,
        edit: HeadEdit,
        eq: &mut EventQueue<Self>,
    ) -> Result<(), WlOutputError> {
        let result = TransactionPlan::single(&self.heads, identifier, edit)
            .and_then(|plan| self.commit_plan(&plan, eq));
        if let Err(e) = &result {
            self.emit(WlOutputEvent::ActionFailed {
                reason: e.to_string(),
            });
        }
        result
    }

    fn apply(
        &mut self,
        eq: &mut EventQueue<Self>,
    ) -> Result<CalculationResult, WlOutputError> {
        let result = self.calculate().clone();
        let plan = TransactionPlan::from_calculation(&result, &self.heads)
            .inspect_err(|e| {
                error!(
                    error = %e,
                    "calculation does not cover the attached outputs"
                );
            })?;

        info!(
            outputs = plan.len(),
            actions = self.queue.len(),
            "applying configuration"
        );
        let outcome = self.commit_plan(&plan, eq);
        self.emit(WlOutputEvent::ConfigurationApplied {
            success: outcome.is_ok(),
        });
        if let Err(e) = outcome {
            warn!(error = %e, "configuration was not applied");
            return Err(e);
        }

        for head in self.heads.iter_mut().filter(|h| !h.is_advertising()) {
            let Some(state) = result.output_state(head.identifier()) else {
                continue;
            };
            head.set_primary(state.primary);
            head.set_relative_output(state.relative_output.clone());
            head.set_anchors(state.horizontal_anchor, state.vertical_anchor);
        }
        self.queue.reset();
        self.calculation = None;
        self.persist(&result);
        Ok(result)
    }

    fn persist(&mut self, result: &CalculationResult) {
        self.options.config.record_calculation(result);
        let Some(path) = &self.options.config_path else {
            return;
        };
        if let Err(e) = self.options.config.save(path) {
            warn!(error = %e, "failed to save display configuration");
        }
    }

    fn commit_plan(
        &mut self,
        plan: &TransactionPlan,
        eq: &mut EventQueue<Self>,
    ) -> Result<(), WlOutputError> {
        let serial = self.serial.ok_or(WlOutputError::NoSerial)?;
        let manager = self
            .zwlr_manager
            .as_ref()
            .ok_or(WlOutputError::ManagerUnavailable)?;

        let qh = eq.handle();
        let transaction =
            Transaction::stage(manager, serial, plan, &self.proxies, &qh)?;
        debug!(serial, heads = plan.len(), "committing configuration");
        transaction.commit();
        let result = self.wait_for_result(eq);
        drop(transaction);
        result
    }

    fn wait_for_result(
        &mut self,
        eq: &mut EventQueue<Self>,
    ) -> Result<(), WlOutputError> {
        self.outcome = TransactionOutcome::Pending;
        while self.outcome == TransactionOutcome::Pending {
            eq.blocking_dispatch(self)
                .map_err(|e| WlOutputError::EventQueue(e.to_string()))?;
            self.flush_changed();
        }
        self.outcome.into_result()
    }

    fn drop_head_proxies(&mut self, head: BindingId) {
        if let Some(proxy) = self.proxies.heads.remove(&head)
            && proxy.version() >= zwlr_output_head_v1::REQ_RELEASE_SINCE
        {
            proxy.release();
        }
        let modes: Vec<BindingId> = self
            .mode_heads
            .iter()
            .filter(|(_, owner)| **owner == head)
            .map(|(mode, _)| *mode)
            .collect();
        for mode in modes {
            self.drop_mode_proxy(mode);
        }
    }

    fn drop_mode_proxy(&mut self, mode: BindingId) {
        self.mode_heads.remove(&mode);
        if let Some(proxy) = self.proxies.modes.remove(&mode)
            && proxy.version() >= zwlr_output_mode_v1::REQ_RELEASE_SINCE
        {
            proxy.release();
        }
    }
}

impl Dispatch<wl_registry::WlRegistry, ()> for WlOutputManager {
    fn event(
        state: &mut Self,
        registry: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        if let wl_registry::Event::Global {
            name,
            interface,
            version,
        } = event
            && interface == ZwlrOutputManagerV1::interface().name
        {
            let version = version.min(MANAGER_VERSION);
            debug!(version, "binding output manager");
            let bound = registry.bind::<ZwlrOutputManagerV1, _, _>(
                name,
                version,
                qh,
                (),
            );
            state.zwlr_manager = Some(bound);
        }
    }
}

impl Dispatch<ZwlrOutputManagerV1, ()> for WlOutputManager {
    fn event(
        state: &mut Self,
        _: &ZwlrOutputManagerV1,
        event: zwlr_output_manager_v1::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        match event {
            zwlr_output_manager_v1::Event::Head { head } => {
                let binding = BindingId::of(&head);
                debug!(?binding, "head advertised");
                state.proxies.heads.insert(binding, head);
                let head =
                    MetaHead::advertised(binding, state.machine_id.clone());
                state.heads.push(head);
                state.fresh.push(binding);
            }
            zwlr_output_manager_v1::Event::Done { serial } => {
                debug!(serial, "output configuration done");
                state.serial = Some(serial);
                state.reconcile();
                state.calculation = None;
                if !state.initialized {
                    state.initialize();
                }
            }
            zwlr_output_manager_v1::Event::Finished => {
                warn!("compositor finished the output manager");
                state.zwlr_manager = None;
            }
            _ => {}
        }
    }

    event_created_child!(WlOutputManager, ZwlrOutputManagerV1, [
        zwlr_output_manager_v1::EVT_HEAD_OPCODE => (ZwlrOutputHeadV1, ())
    ]);
}

impl Dispatch<ZwlrOutputHeadV1, ()> for WlOutputManager {
    fn event(
        state: &mut Self,
        head: &ZwlrOutputHeadV1,
        event: <ZwlrOutputHeadV1 as Proxy>::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let binding = BindingId::of(head);

        if let zwlr_output_head_v1::Event::Mode { mode } = &event {
            let mode_binding = BindingId::of(mode);
            state.proxies.modes.insert(mode_binding, mode.clone());
            state.mode_heads.insert(mode_binding, binding);
        }

        let Some(change) = HeadChange::from_event(event) else {
            return;
        };
        let finished = change == HeadChange::Finished;
        let Some(meta) = state.head_by_binding(binding) else {
            return;
        };
        if meta.apply(change) {
            state.changed.insert(binding);
        }
        if finished {
            state.changed.remove(&binding);
            state.drop_head_proxies(binding);
        }
    }

    event_created_child!(WlOutputManager, ZwlrOutputHeadV1, [
        zwlr_output_head_v1::EVT_MODE_OPCODE => (ZwlrOutputModeV1, ())
    ]);
}

impl Dispatch<ZwlrOutputModeV1, ()> for WlOutputManager {
    fn event(
        state: &mut Self,
        mode: &ZwlrOutputModeV1,
        event: <ZwlrOutputModeV1 as Proxy>::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let mode_binding = BindingId::of(mode);
        let Some(change) = ModeChange::from_event(event) else {
            return;
        };
        let Some(&head_binding) = state.mode_heads.get(&mode_binding) else {
            return;
        };
        if let Some(meta) = state.head_by_binding(head_binding)
            && meta.apply_mode(mode_binding, change)
        {
            state.changed.insert(head_binding);
        }
        if change == ModeChange::Finished {
            state.drop_mode_proxy(mode_binding);
        }
    }
}

impl Dispatch<ZwlrOutputConfigurationV1, ()> for WlOutputManager {
    fn event(
        state: &mut Self,
        _: &ZwlrOutputConfigurationV1,
        event: zwlr_output_configuration_v1::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        state.outcome = match event {
            zwlr_output_configuration_v1::Event::Succeeded => {
                TransactionOutcome::Succeeded
            }
            zwlr_output_configuration_v1::Event::Failed => {
                TransactionOutcome::Failed
            }
            zwlr_output_configuration_v1::Event::Cancelled => {
                TransactionOutcome::Cancelled
            }
            _ => return,
        };
        debug!(outcome = ?state.outcome, "configuration finished");
    }
}

impl Dispatch<ZwlrOutputConfigurationHeadV1, ()> for WlOutputManager {
    fn event(
        _: &mut Self,
        _: &ZwlrOutputConfigurationHeadV1,
        _event: zwlr_output_configuration_head_v1::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
    }
}
