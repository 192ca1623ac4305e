//! Application engine: the execution engine wired to gas metering, interop services,
//! storage and contract calls.
//!
//! [`ApplicationHost`] plugs into the engine's [`Host`] hooks:
//! - every instruction is charged `price * exec_fee_factor` before it runs;
//! - `SYSCALL` is dispatched through the [`InteropRegistry`] after a call flag check;
//! - `CALLT` resolves the current contract's method tokens;
//! - unloading a frame settles notifications, dynamic call results and continuations.
//!
//! Per-frame data such as the script hash and the granted call flags lives in an
//! [`ExecutionContextState`] attached to each context.

#[cfg(test)]
mod tests;

use crate::info;
use crate::smart_contract::call_flags::CallFlags;
use crate::smart_contract::container::{BlockInfo, ScriptContainer};
use crate::smart_contract::contracts::{ContractMethod, ContractState, get_contract};
use crate::smart_contract::continuation::Continuation;
use crate::smart_contract::events::{LogEvent, Notification};
use crate::smart_contract::gas::{GasCategory, GasProfile};
use crate::smart_contract::interop::{
    InteropArgs, InteropParameterType, InteropRegistry, InteropValue, item_count,
};
use crate::smart_contract::price_table::PriceTable;
use crate::smart_contract::settings::{Hardfork, ProtocolSettings};
use crate::smart_contract::trigger::TriggerType;
use crate::state::State;
use crate::types::address::Address;
use crate::virtual_machine::engine::context::ExecutionContext;
use crate::virtual_machine::engine::limits::ExecutionEngineLimits;
use crate::virtual_machine::engine::{ExecutionEngine, Host, VMState};
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::instruction::Instruction;
use crate::virtual_machine::script::Script;
use crate::virtual_machine::stack_item::StackItem;
use std::cell::RefMut;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

/// Execution engine running contracts on behalf of a container.
pub type ApplicationEngine<'a> = ExecutionEngine<ApplicationHost<'a>>;

/// Resume closure of a [`Continuation`].
pub type ResumeFn<'a> =
    Box<dyn FnOnce(&mut ApplicationEngine<'a>, &Continuation) -> Result<(), VMError> + 'a>;

/// Per-frame data of the application engine.
#[derive(Clone, Debug)]
pub struct ExecutionContextState {
    /// Hash of the running script. Filled from the script on first use when unset.
    pub script_hash: Option<Address>,
    pub calling_script_hash: Option<Address>,
    pub call_flags: CallFlags,
    /// Loaded by `System.Contract.Call`, which always yields a value to its caller.
    pub is_dynamic_call: bool,
    /// The deployed contract this frame runs, if any.
    pub contract: Option<Rc<ContractState>>,
    /// Notifications raised by this frame and the callees that returned normally.
    pub notification_count: usize,
}

impl Default for ExecutionContextState {
    fn default() -> Self {
        Self {
            script_hash: None,
            calling_script_hash: None,
            call_flags: CallFlags::ALL,
            is_dynamic_call: false,
            contract: None,
            notification_count: 0,
        }
    }
}

/// Host state of an [`ApplicationEngine`].
pub struct ApplicationHost<'a> {
    trigger: TriggerType,
    container: Option<&'a dyn ScriptContainer>,
    snapshot: &'a mut dyn State,
    persisting_block: Option<BlockInfo>,
    settings: &'a ProtocolSettings,
    price_table: Arc<PriceTable>,
    interops: Rc<InteropRegistry>,
    gas_limit: i64,
    fee_consumed: i64,
    exec_fee_factor: i64,
    storage_price: i64,
    gas_profile: GasProfile,
    notifications: Vec<Notification>,
    logs: Vec<LogEvent>,
    invocation_counter: HashMap<Address, u32>,
    awaiters: HashMap<u64, (Continuation, ResumeFn<'a>)>,
}

impl<'a> Host for ApplicationHost<'a> {
    fn pre_execute_instruction(
        engine: &mut ExecutionEngine<Self>,
        instruction: &Instruction,
    ) -> Result<(), VMError> {
        let price = engine.host.price_table.price(instruction.opcode);
        engine.add_fee(GasCategory::Opcode, price * engine.host.exec_fee_factor)
    }

    fn on_syscall(engine: &mut ExecutionEngine<Self>, selector: u32) -> Result<(), VMError> {
        engine.dispatch_syscall(selector)
    }

    fn on_call_token(engine: &mut ExecutionEngine<Self>, token: u16) -> Result<(), VMError> {
        engine.call_token(token)
    }

    fn on_context_unloaded(
        engine: &mut ExecutionEngine<Self>,
        context: &ExecutionContext,
    ) -> Result<(), VMError> {
        engine.context_unloaded(context)
    }
}

impl<'a> ExecutionEngine<ApplicationHost<'a>> {
    /// Builds an engine with the standard price table and interop services.
    pub fn create(
        trigger: TriggerType,
        container: Option<&'a dyn ScriptContainer>,
        snapshot: &'a mut dyn State,
        persisting_block: Option<BlockInfo>,
        settings: &'a ProtocolSettings,
        gas_limit: i64,
    ) -> Self {
        let host = ApplicationHost {
            trigger,
            container,
            snapshot,
            persisting_block,
            settings,
            price_table: Arc::new(PriceTable::new()),
            interops: Rc::new(InteropRegistry::standard()),
            gas_limit,
            fee_consumed: 0,
            exec_fee_factor: settings.exec_fee_factor,
            storage_price: settings.storage_price,
            gas_profile: GasProfile::new(),
            notifications: Vec::new(),
            logs: Vec::new(),
            invocation_counter: HashMap::new(),
            awaiters: HashMap::new(),
        };
        ExecutionEngine::new(host, ExecutionEngineLimits::default())
    }

    /// Replaces the opcode price table, typically with one shared between engines.
    pub fn with_price_table(mut self, price_table: Arc<PriceTable>) -> Self {
        self.host.price_table = price_table;
        self
    }

    /// Replaces the interop services.
    pub fn with_interops(mut self, interops: Rc<InteropRegistry>) -> Self {
        self.host.interops = interops;
        self
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    pub fn trigger(&self) -> TriggerType {
        self.host.trigger
    }

    pub fn container(&self) -> Option<&'a dyn ScriptContainer> {
        self.host.container
    }

    pub fn snapshot(&self) -> &dyn State {
        &*self.host.snapshot
    }

    pub fn snapshot_mut(&mut self) -> &mut dyn State {
        &mut *self.host.snapshot
    }

    pub fn persisting_block(&self) -> Option<&BlockInfo> {
        self.host.persisting_block.as_ref()
    }

    pub fn settings(&self) -> &'a ProtocolSettings {
        self.host.settings
    }

    pub fn exec_fee_factor(&self) -> i64 {
        self.host.exec_fee_factor
    }

    pub fn storage_price(&self) -> i64 {
        self.host.storage_price
    }

    pub fn gas_consumed(&self) -> i64 {
        self.host.fee_consumed
    }

    pub fn gas_left(&self) -> i64 {
        self.host.gas_limit - self.host.fee_consumed
    }

    pub fn gas_profile(&self) -> &GasProfile {
        &self.host.gas_profile
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.host.notifications
    }

    pub fn logs(&self) -> &[LogEvent] {
        &self.host.logs
    }

    /// Whether `hardfork` is active at the persisting block, or at genesis without one.
    pub fn is_hardfork_enabled(&self, hardfork: Hardfork) -> bool {
        let index = self.host.persisting_block.map_or(0, |block| block.index);
        self.host.settings.is_hardfork_enabled(hardfork, index)
    }

    // ---------------------------------------------------------------------
    // Gas
    // ---------------------------------------------------------------------

    /// Charges `datoshi` to `category`.
    ///
    /// Going past the limit pins the consumed fee at the limit and returns
    /// [`VMError::InsufficientGas`].
    pub fn add_fee(&mut self, category: GasCategory, datoshi: i64) -> Result<(), VMError> {
        let host = &mut self.host;
        let consumed = host.fee_consumed.saturating_add(datoshi);
        if consumed > host.gas_limit {
            host.gas_profile.add(category, host.gas_limit - host.fee_consumed);
            host.fee_consumed = host.gas_limit;
            return Err(VMError::InsufficientGas {
                consumed,
                limit: host.gas_limit,
            });
        }
        host.gas_profile.add(category, datoshi);
        host.fee_consumed = consumed;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Frame state
    // ---------------------------------------------------------------------

    pub fn current_state(&self) -> Result<RefMut<'_, ExecutionContextState>, VMError> {
        self.current_context()?.state::<ExecutionContextState>()
    }

    pub fn current_script_hash(&self) -> Result<Address, VMError> {
        script_hash_of(self.current_context()?)
    }

    pub fn calling_script_hash(&self) -> Result<Option<Address>, VMError> {
        Ok(self.current_state()?.calling_script_hash)
    }

    pub fn entry_script_hash(&self) -> Result<Option<Address>, VMError> {
        self.entry_context().map(script_hash_of).transpose()
    }

    /// Times the contract `hash` was called in this execution.
    pub fn invocation_count(&self, hash: &Address) -> Option<u32> {
        self.host.invocation_counter.get(hash).copied()
    }

    pub(crate) fn set_invocation_count(&mut self, hash: Address, count: u32) {
        self.host.invocation_counter.insert(hash, count);
    }

    // ---------------------------------------------------------------------
    // Loading
    // ---------------------------------------------------------------------

    /// Loads `script` as a new frame running with `call_flags`.
    ///
    /// Returns the frame's id.
    pub fn load_script_with_flags(
        &mut self,
        script: Rc<Script>,
        rvcount: i32,
        call_flags: CallFlags,
    ) -> Result<u64, VMError> {
        let context = self.create_context(script, rvcount, 0);
        let calling_script_hash = match self.current_context() {
            Ok(caller) => Some(script_hash_of(caller)?),
            Err(_) => None,
        };
        context.set_state(ExecutionContextState {
            calling_script_hash,
            call_flags,
            ..ExecutionContextState::default()
        });
        let id = context.id();
        self.load_context(context)?;
        Ok(id)
    }

    /// Loads `method` of `contract` with `call_flags`, followed by its `_initialize` method
    /// when the manifest declares one.
    ///
    /// The caller pushes the arguments afterwards, last argument first. Returns the id of
    /// the method's frame.
    pub fn load_contract(
        &mut self,
        contract: Rc<ContractState>,
        method: &ContractMethod,
        call_flags: CallFlags,
    ) -> Result<u64, VMError> {
        let strict = self.is_hardfork_enabled(Hardfork::Basilisk);
        let script = Rc::new(Script::new(contract.script().to_vec(), strict)?);
        let rvcount = if method.has_return_value() { 1 } else { 0 };
        let context = self.create_context(script, rvcount, method.offset as usize);
        context.set_state(ExecutionContextState {
            script_hash: Some(contract.hash),
            call_flags,
            contract: Some(contract.clone()),
            ..ExecutionContextState::default()
        });
        let id = context.id();
        self.load_context(context)?;

        if let Some(init) = contract.manifest.get_method("_initialize", Some(0)) {
            if init.offset != method.offset {
                self.execute_call(init.offset as i64)?;
            }
        }
        Ok(id)
    }

    // ---------------------------------------------------------------------
    // Contract calls
    // ---------------------------------------------------------------------

    /// Calls `method` of the contract at `hash` from the current frame.
    ///
    /// Returns the callee frame id.
    pub fn call_contract(
        &mut self,
        hash: Address,
        method: &str,
        call_flags: CallFlags,
        has_return_value: bool,
        args: Vec<StackItem>,
    ) -> Result<u64, VMError> {
        let contract = get_contract(self.snapshot(), &hash)?
            .ok_or_else(|| VMError::ContractNotFound(hash.to_string()))?;
        let method = contract
            .manifest
            .get_method(method, Some(args.len()))
            .cloned()
            .ok_or_else(|| VMError::MethodNotFound {
                contract: hash.to_string(),
                method: method.to_string(),
                parameters: args.len(),
            })?;
        if method.has_return_value() != has_return_value {
            return Err(VMError::InvalidOperation(format!(
                "method {} return value mismatch",
                method.name
            )));
        }
        self.call_contract_internal(Rc::new(contract), &method, call_flags, args)
    }

    /// `System.Contract.Call`: the callee always leaves one item for the caller.
    pub(crate) fn call_contract_dynamic(
        &mut self,
        hash: Address,
        method: &str,
        call_flags: CallFlags,
        args: Vec<StackItem>,
    ) -> Result<u64, VMError> {
        let contract = get_contract(self.snapshot(), &hash)?
            .ok_or_else(|| VMError::ContractNotFound(hash.to_string()))?;
        let method = contract
            .manifest
            .get_method(method, Some(args.len()))
            .cloned()
            .ok_or_else(|| VMError::MethodNotFound {
                contract: hash.to_string(),
                method: method.to_string(),
                parameters: args.len(),
            })?;
        let id = self.call_contract_internal(Rc::new(contract), &method, call_flags, args)?;
        if let Some(context) = self.invocation_stack().iter().rev().find(|c| c.id() == id) {
            context.state::<ExecutionContextState>()?.is_dynamic_call = true;
        }
        Ok(id)
    }

    fn call_contract_internal(
        &mut self,
        contract: Rc<ContractState>,
        method: &ContractMethod,
        mut call_flags: CallFlags,
        args: Vec<StackItem>,
    ) -> Result<u64, VMError> {
        if method.safe {
            call_flags = call_flags & !(CallFlags::WRITE_STATES | CallFlags::ALLOW_NOTIFY);
        }
        let caller = match self.current_context() {
            Ok(context) => {
                let caller_flags = context.state::<ExecutionContextState>()?.call_flags;
                Some((script_hash_of(context)?, caller_flags))
            }
            Err(_) => None,
        };
        if let Some((_, caller_flags)) = caller {
            call_flags = call_flags & caller_flags;
        }

        let counter = self.host.invocation_counter.entry(contract.hash).or_insert(0);
        *counter = counter.saturating_add(1);
        info!(
            "calling {}.{} with flags {}",
            contract.manifest.name, method.name, call_flags
        );

        let id = self.load_contract(contract, method, call_flags)?;
        let context = self
            .invocation_stack()
            .iter()
            .rev()
            .find(|c| c.id() == id)
            .ok_or(VMError::NoCurrentContext)?;
        context.state::<ExecutionContextState>()?.calling_script_hash = caller.map(|(hash, _)| hash);
        let mut stack = context.evaluation_stack();
        for arg in args.into_iter().rev() {
            stack.push(arg);
        }
        Ok(id)
    }

    /// Calls a contract and runs `on_complete` once the callee frame unloads.
    ///
    /// Returns the continuation the callee's result or exception is delivered to.
    pub fn call_contract_awaiting(
        &mut self,
        hash: Address,
        method: &str,
        call_flags: CallFlags,
        has_return_value: bool,
        args: Vec<StackItem>,
        on_complete: ResumeFn<'a>,
    ) -> Result<Continuation, VMError> {
        let id = self.call_contract(hash, method, call_flags, has_return_value, args)?;
        let continuation = Continuation::new();
        self.host
            .awaiters
            .insert(id, (continuation.clone(), on_complete));
        Ok(continuation)
    }

    fn call_token(&mut self, token: u16) -> Result<(), VMError> {
        let (contract, granted) = {
            let state = self.current_state()?;
            (state.contract.clone(), state.call_flags)
        };
        let contract = contract
            .ok_or_else(|| VMError::InvalidOperation("CALLT outside of a contract".into()))?;
        let token = contract
            .nef
            .tokens
            .get(token as usize)
            .cloned()
            .ok_or_else(|| VMError::InvalidOperation(format!("method token {token} not found")))?;
        if !granted.contains(token.call_flags) {
            return Err(VMError::InvalidOperation(format!(
                "method token requires call flags {}, frame has {}",
                token.call_flags, granted
            )));
        }

        let count = token.parameters_count as usize;
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            args.push(self.pop()?);
        }
        self.call_contract(
            token.hash,
            &token.method,
            token.call_flags,
            token.has_return_value,
            args,
        )?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Interop dispatch
    // ---------------------------------------------------------------------

    fn dispatch_syscall(&mut self, selector: u32) -> Result<(), VMError> {
        let descriptor = *self
            .host
            .interops
            .get(selector)
            .ok_or(VMError::InteropNotFound(selector))?;

        let granted = self.current_state()?.call_flags;
        if !granted.contains(descriptor.required_call_flags) {
            return Err(VMError::PermissionDenied {
                syscall: descriptor.name,
                required: descriptor.required_call_flags.bits(),
                granted: granted.bits(),
            });
        }

        self.add_fee(
            GasCategory::Syscall,
            descriptor.price * self.host.exec_fee_factor,
        )?;

        let mut values = Vec::with_capacity(descriptor.parameters.len());
        for kind in descriptor.parameters {
            let item = self.pop()?;
            let counted = *kind == InteropParameterType::CountedArray
                && !matches!(item, StackItem::Array(_) | StackItem::Struct(_));
            let value = if counted {
                self.pop_counted_items(item)?
            } else {
                InteropValue::convert(item, *kind, &self.heap())?
            };
            values.push(value);
        }
        let mut args = InteropArgs::new(values);

        if let Some(result) = (descriptor.handler)(self, &mut args)? {
            self.push(result)?;
        }
        Ok(())
    }

    fn pop_counted_items(&mut self, count: StackItem) -> Result<InteropValue, VMError> {
        let n = item_count(&count, self.limits().max_stack_size)?;
        let items = (0..n).map(|_| self.pop()).collect::<Result<Vec<_>, _>>()?;
        Ok(InteropValue::Array { item: count, items })
    }

    // ---------------------------------------------------------------------
    // Events
    // ---------------------------------------------------------------------

    pub(crate) fn push_notification(&mut self, notification: Notification) -> Result<(), VMError> {
        self.current_state()?.notification_count += 1;
        self.host.notifications.push(notification);
        Ok(())
    }

    pub(crate) fn push_log(&mut self, log: LogEvent) {
        self.host.logs.push(log);
    }

    // ---------------------------------------------------------------------
    // Unloading
    // ---------------------------------------------------------------------

    fn context_unloaded(&mut self, context: &ExecutionContext) -> Result<(), VMError> {
        let returns_to_own_states = self
            .invocation_stack()
            .last()
            .is_some_and(|current| current.shares_states_with(context));
        if !returns_to_own_states {
            self.settle_frame(context)?;
        }

        if let Some((continuation, resume)) = self.host.awaiters.remove(&context.id()) {
            self.resume(context, continuation, resume)?;
        }

        if self.state() == VMState::Halt {
            info!("execution halted, {} datoshi consumed", self.host.fee_consumed);
        }
        Ok(())
    }

    /// Hands a returning frame's notifications to its caller, or discards them when the
    /// frame is unwound by an exception.
    fn settle_frame(&mut self, context: &ExecutionContext) -> Result<(), VMError> {
        let (notification_count, is_dynamic_call) = {
            let state = context.state::<ExecutionContextState>()?;
            (state.notification_count, state.is_dynamic_call)
        };

        if self.uncaught_exception().is_some() {
            let keep = self
                .host
                .notifications
                .len()
                .saturating_sub(notification_count);
            self.host.notifications.truncate(keep);
            return Ok(());
        }

        if let Ok(caller) = self.current_context() {
            caller.state::<ExecutionContextState>()?.notification_count += notification_count;
            if is_dynamic_call && context.rvcount() == 0 {
                caller.evaluation_stack().push(StackItem::Null);
            }
        }
        Ok(())
    }

    fn resume(
        &mut self,
        context: &ExecutionContext,
        continuation: Continuation,
        resume: ResumeFn<'a>,
    ) -> Result<(), VMError> {
        if let Some(exception) = self.uncaught_exception() {
            let message = exception
                .get_string(&self.heap())
                .unwrap_or_else(|_| exception.type_name().to_string());
            continuation.set_exception(message);
        } else {
            let result = if context.rvcount() == 0 {
                StackItem::Null
            } else if self.invocation_stack().is_empty() {
                self.result_stack_mut().pop()?
            } else {
                self.pop()?
            };
            continuation.set_result(result);
        }
        resume(self, &continuation)
    }
}

/// Hash of the script a frame runs, cached in its state.
fn script_hash_of(context: &ExecutionContext) -> Result<Address, VMError> {
    let mut state = context.state::<ExecutionContextState>()?;
    if let Some(hash) = state.script_hash {
        return Ok(hash);
    }
    let hash = context.script().hash();
    state.script_hash = Some(hash);
    Ok(hash)
}
