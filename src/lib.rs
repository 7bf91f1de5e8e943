//! A host-side bridge to Yggdrasil, the Unleash feature toggle engine.
//!
//! # Overview
//!
//! The engine is reached in one of two ways: as a native shared library speaking JSON
//! ([`transport::native`]) or as a sandboxed wasm module speaking flatbuffers
//! ([`transport::wasm`]). Both sit behind the [`transport::Transport`] trait, so the rest of the
//! crate is transport-agnostic.
//!
//! An [`Engine`] owns one engine instance. It takes feature toggle state as JSON, evaluates
//! toggles and variants against a [`Context`], and hands out usage counters as a
//! [`MetricsBucket`]. Calls are serialized, so one handle may be shared across threads. The
//! instance is destroyed exactly once, when the handle is dropped or released.
//!
//! Strategies the engine does not know about can be implemented on the host as a
//! [`CustomStrategy`] and registered through [`EngineConfig`]. Their results are computed before
//! each evaluation and passed to the engine alongside the context.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum. Engine-reported errors come back as
//! [`Error::Engine`], malformed engine output as [`Error::Parse`] with the offending bytes
//! attached. A custom strategy that panics never fails an evaluation: it counts as not granting
//! access and is logged.
//!
//! # Logging
//!
//! The crate uses the [`log`](https://docs.rs/log/latest/log/) crate with target `yggdrasil`.
//! Lines written by the sandboxed engine are forwarded at `debug` level.
//!
//! # Examples
//!
//! A runnable example lives in `demos/simple` of the crate repository.

#![warn(rustdoc::missing_crate_level_docs)]

pub mod codec;
mod config;
mod context;
pub mod custom_strategies;
mod engine;
mod error;
mod metrics;
pub mod packed;
pub mod response;
mod strategy;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::EngineConfig;
pub use context::Context;
pub use custom_strategies::{
    CustomStrategiesEvaluator, CustomStrategyResults, SlotOutcome, StrategyDefinition,
};
pub use engine::Engine;
pub use error::{Error, Result};
pub use metrics::{FeatureCount, MetricsBucket};
pub use response::{EvaluationResponse, Payload, StateWarning, Status, ToggleDefinition, VariantDef};
pub use strategy::{strategy_fn, CustomStrategy, FnStrategy};

#[cfg(feature = "native")]
pub use transport::native::NativeTransport;
#[cfg(feature = "wasm")]
pub use transport::wasm::WasmTransport;
