//! Contract execution layer on top of the virtual machine.
//!
//! # Architecture
//!
//! - **Application engine**: an [`application_engine::ApplicationEngine`] is an
//!   `ExecutionEngine` whose host charges gas per instruction, dispatches `SYSCALL`s to
//!   interop services and tracks per-frame call flags, notifications and contract identity
//! - **Interop services**: named host functions selected by the first four bytes of the
//!   SHA3-256 of their name, each with a price and required call flags
//! - **Storage**: contract key/value pairs addressed by contract id in a [`crate::state::State`]
//! - **Witnesses**: signer scopes for `CheckWitness` and standalone witness verification
//!
//! # Modules
//!
//! - [`application_engine`]: Metered engine, contract calls and frame bookkeeping
//! - [`binary_serializer`]: Stack item serialization for storage and notifications
//! - [`call_flags`]: Permissions a frame runs with
//! - [`container`]: Script containers, signers and witnesses
//! - [`continuation`]: Results of contract calls awaited by host handlers
//! - [`contracts`]: Deployed contract state and `System.Contract` services
//! - [`crypto`]: Signature checks and standard account scripts
//! - [`events`]: Notifications and log events
//! - [`gas`]: Fee accounting by category
//! - [`interop`]: Service registry and argument conversion
//! - [`nef`]: Contract executable format
//! - [`price_table`]: Opcode prices
//! - [`runtime`]: `System.Runtime` services
//! - [`settings`]: Protocol settings and hardforks
//! - [`storage`]: `System.Storage` and `System.Iterator` services
//! - [`trigger`]: Why an execution runs
//! - [`witness`]: Witness scope checks and verification

pub mod application_engine;
pub mod binary_serializer;
pub mod call_flags;
pub mod container;
pub mod continuation;
pub mod contracts;
pub mod crypto;
pub mod events;
pub mod gas;
pub mod interop;
pub mod nef;
pub mod price_table;
pub mod runtime;
pub mod settings;
pub mod storage;
pub mod trigger;
pub mod witness;
