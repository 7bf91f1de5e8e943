//! Transport for an engine running inside a sandbox with its own linear memory.
//!
//! Every call follows the same shape: encode with [`binary`], copy the request into a module-owned
//! buffer, call the export, copy the packed-pointer response out, release both buffers, decode.
//! State is the exception: `take_state` and `get_state` answer with a NUL-terminated string that
//! stays owned by the module.
use chrono::{DateTime, Utc};

use crate::{
    codec::{binary, EvaluationRequest},
    packed::{read_c_string, take_response, with_request, GuestMemory, PackedPointer},
    response::{EvaluationResponse, StateWarning, ToggleDefinition, VariantDef},
    MetricsBucket, Result,
};

use super::Transport;

/// What the engine returns from `get_state` before any state was taken.
const EMPTY_STATE: &str = r#"{"version":2,"features":[]}"#;

/// Raw exports of a sandboxed engine module.
///
/// Functions returning `u64` return a [`PackedPointer`] to a response buffer. `take_state` and
/// `get_state` return the offset of a NUL-terminated string, `0` for none. Offsets and lengths
/// passed in come from [`GuestMemory::alloc`].
pub trait SandboxModule: GuestMemory + Send {
    fn new_engine(&mut self, now_ms: i64) -> Result<u32>;
    fn free_engine(&mut self, engine: u32) -> Result<()>;
    fn take_state(&mut self, engine: u32, offset: u32, len: u32) -> Result<u32>;
    fn get_state(&mut self, engine: u32) -> Result<u32>;
    fn check_enabled(&mut self, engine: u32, offset: u32, len: u32) -> Result<u64>;
    fn check_variant(&mut self, engine: u32, offset: u32, len: u32) -> Result<u64>;
    fn get_metrics(&mut self, engine: u32, now_ms: i64) -> Result<u64>;
    fn list_known_toggles(&mut self, engine: u32) -> Result<u64>;
    fn get_built_in_strategies(&mut self) -> Result<u64>;
    fn get_core_version(&mut self) -> Result<u64>;

    /// Take the next line the engine logged, if any.
    fn drain_log(&mut self) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Handle of an engine instance living inside the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SandboxEngine(u32);

/// [`Transport`] over any [`SandboxModule`].
pub struct SandboxTransport<M> {
    module: M,
}

impl<M: SandboxModule> SandboxTransport<M> {
    pub fn new(module: M) -> SandboxTransport<M> {
        SandboxTransport { module }
    }

    pub fn module(&self) -> &M {
        &self.module
    }

    fn evaluate<T>(
        &mut self,
        request: &EvaluationRequest<'_>,
        export: impl FnOnce(&mut M, u32, u32) -> Result<u64>,
        decode: impl FnOnce(&[u8]) -> Result<EvaluationResponse<T>>,
    ) -> Result<EvaluationResponse<T>> {
        let bytes = binary::encode_request(request)?;
        log::trace!(target: "yggdrasil", toggle_name = request.toggle_name, len = bytes.len(); "evaluating in sandbox");

        let result = with_request(&mut self.module, &bytes, |module, offset, len| {
            let packed = export(module, offset, len)?;
            take_response(module, PackedPointer::from(packed), decode)
        });
        self.forward_engine_log();
        result
    }

    fn forward_engine_log(&mut self) {
        loop {
            match self.module.drain_log() {
                Ok(Some(line)) => log::debug!(target: "yggdrasil", "engine: {line}"),
                Ok(None) => break,
                Err(err) => {
                    log::debug!(target: "yggdrasil", "failed to read engine log: {err}");
                    break;
                }
            }
        }
    }

    fn call<T>(
        &mut self,
        export: impl FnOnce(&mut M) -> Result<u64>,
        decode: impl FnOnce(&[u8]) -> Result<T>,
    ) -> Result<T> {
        let packed = export(&mut self.module)?;
        take_response(&mut self.module, PackedPointer::from(packed), decode)
    }
}

impl<M: SandboxModule> Transport for SandboxTransport<M> {
    type Instance = SandboxEngine;

    fn new_engine(&mut self) -> Result<SandboxEngine> {
        let engine = self.module.new_engine(Utc::now().timestamp_millis())?;
        log::debug!(target: "yggdrasil", engine; "created sandbox engine");
        Ok(SandboxEngine(engine))
    }

    fn free_engine(&mut self, instance: SandboxEngine) -> Result<()> {
        log::debug!(target: "yggdrasil", engine = instance.0; "freeing sandbox engine");
        self.module.free_engine(instance.0)
    }

    fn take_state(
        &mut self,
        instance: SandboxEngine,
        state: &str,
    ) -> Result<EvaluationResponse<Vec<StateWarning>>> {
        let text = with_request(
            &mut self.module,
            state.as_bytes(),
            |module, offset, len| {
                let text = module.take_state(instance.0, offset, len)?;
                read_c_string(module, text)
            },
        )?;
        Ok(binary::decode_take_state(text.as_deref()))
    }

    fn get_state(&mut self, instance: SandboxEngine) -> Result<String> {
        let state = self.module.get_state(instance.0)?;
        Ok(read_c_string(&mut self.module, state)?.unwrap_or_else(|| EMPTY_STATE.to_owned()))
    }

    fn check_enabled(
        &mut self,
        instance: SandboxEngine,
        request: &EvaluationRequest<'_>,
    ) -> Result<EvaluationResponse<bool>> {
        self.evaluate(
            request,
            |module, offset, len| module.check_enabled(instance.0, offset, len),
            binary::decode_enabled,
        )
    }

    fn check_variant(
        &mut self,
        instance: SandboxEngine,
        request: &EvaluationRequest<'_>,
    ) -> Result<EvaluationResponse<VariantDef>> {
        self.evaluate(
            request,
            |module, offset, len| module.check_variant(instance.0, offset, len),
            binary::decode_variant,
        )
    }

    fn get_metrics(
        &mut self,
        instance: SandboxEngine,
        now: DateTime<Utc>,
    ) -> Result<Option<MetricsBucket>> {
        self.call(
            |module| module.get_metrics(instance.0, now.timestamp_millis()),
            binary::decode_metrics,
        )
    }

    fn list_known_toggles(&mut self, instance: SandboxEngine) -> Result<Vec<ToggleDefinition>> {
        self.call(
            |module| module.list_known_toggles(instance.0),
            binary::decode_toggle_definitions,
        )
    }

    fn built_in_strategies(&mut self) -> Result<Vec<String>> {
        self.call(
            |module| module.get_built_in_strategies(),
            binary::decode_built_in_strategies,
        )
    }

    fn core_version(&mut self) -> Result<String> {
        self.call(|module| module.get_core_version(), binary::decode_core_version)
    }
}
