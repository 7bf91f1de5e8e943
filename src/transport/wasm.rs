//! The engine compiled to wasm, run with `wasmtime`.
use std::path::Path;

use rand::RngCore;
use wasmtime::{
    Caller, Extern, Instance, Linker, Memory, Module, Store, TypedFunc, WasmParams, WasmResults,
};

use crate::{
    packed::{nul_terminated, GuestMemory},
    Error, Result,
};

use super::sandbox::{SandboxModule, SandboxTransport};

/// Environment variable holding the path of the engine `.wasm` file.
pub const WASM_PATH_ENV: &str = "YGGDRASIL_WASM_PATH";

/// Size of the module's log buffer, including the terminating NUL.
const LOG_BUFFER_LEN: usize = 4096;

/// [`SandboxTransport`] running the wasm engine.
pub type WasmTransport = SandboxTransport<WasmModule>;

impl SandboxTransport<WasmModule> {
    /// Load the engine module from `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<WasmTransport> {
        WasmModule::from_file(path).map(SandboxTransport::new)
    }

    /// Load the engine module from the path in `YGGDRASIL_WASM_PATH`.
    pub fn from_env() -> Result<WasmTransport> {
        WasmModule::from_env().map(SandboxTransport::new)
    }
}

struct Exports {
    alloc: TypedFunc<i32, i32>,
    dealloc: TypedFunc<(i32, i32), ()>,
    dealloc_response: TypedFunc<(i32, i32), ()>,
    new_engine: TypedFunc<i64, i32>,
    free_engine: TypedFunc<i32, ()>,
    take_state: TypedFunc<(i32, i32, i32), i32>,
    get_state: TypedFunc<i32, i32>,
    check_enabled: TypedFunc<(i32, i32, i32), i64>,
    check_variant: TypedFunc<(i32, i32, i32), i64>,
    get_metrics: TypedFunc<(i32, i64), i64>,
    list_known_toggles: TypedFunc<i32, i64>,
    get_built_in_strategies: TypedFunc<(), i64>,
    get_core_version: TypedFunc<(), i64>,
    get_log_buffer_ptr: TypedFunc<(), i32>,
}

/// An instantiated engine module.
pub struct WasmModule {
    store: Store<()>,
    memory: Memory,
    exports: Exports,
    /// Last engine log line handed out; the module buffer is never written by the host.
    last_log: Option<String>,
}

impl WasmModule {
    pub fn from_file(path: impl AsRef<Path>) -> Result<WasmModule> {
        let path = path.as_ref();
        let engine = wasmtime::Engine::default();
        let module = Module::from_file(&engine, path).map_err(|err| {
            Error::Setup(format!("failed to compile {}: {err}", path.display()))
        })?;
        WasmModule::instantiate(&engine, &module)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<WasmModule> {
        let engine = wasmtime::Engine::default();
        let module = Module::new(&engine, bytes)
            .map_err(|err| Error::Setup(format!("failed to compile engine module: {err}")))?;
        WasmModule::instantiate(&engine, &module)
    }

    pub fn from_env() -> Result<WasmModule> {
        let path = std::env::var_os(WASM_PATH_ENV)
            .ok_or_else(|| Error::Setup(format!("{WASM_PATH_ENV} is not set")))?;
        WasmModule::from_file(path)
    }

    fn instantiate(engine: &wasmtime::Engine, module: &Module) -> Result<WasmModule> {
        let mut store = Store::new(engine, ());
        let mut linker = Linker::new(engine);
        linker
            .func_wrap("env", "fill_random", fill_random)
            .map_err(|err| Error::Setup(format!("failed to link host functions: {err}")))?;
        let instance = linker
            .instantiate(&mut store, module)
            .map_err(|err| Error::Setup(format!("failed to instantiate engine module: {err}")))?;

        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| Error::Setup("engine module does not export its memory".to_owned()))?;
        let exports = Exports {
            alloc: typed(&instance, &mut store, "local_alloc")?,
            dealloc: typed(&instance, &mut store, "local_dealloc")?,
            dealloc_response: typed(&instance, &mut store, "dealloc_response_buffer")?,
            new_engine: typed(&instance, &mut store, "new_engine")?,
            free_engine: typed(&instance, &mut store, "free_engine")?,
            take_state: typed(&instance, &mut store, "take_state")?,
            get_state: typed(&instance, &mut store, "get_state")?,
            check_enabled: typed(&instance, &mut store, "check_enabled")?,
            check_variant: typed(&instance, &mut store, "check_variant")?,
            get_metrics: typed(&instance, &mut store, "get_metrics")?,
            list_known_toggles: typed(&instance, &mut store, "list_known_toggles")?,
            get_built_in_strategies: typed(&instance, &mut store, "get_built_in_strategies")?,
            get_core_version: typed(&instance, &mut store, "get_core_version")?,
            get_log_buffer_ptr: typed(&instance, &mut store, "get_log_buffer_ptr")?,
        };

        Ok(WasmModule {
            store,
            memory,
            exports,
            last_log: None,
        })
    }
}

fn typed<Params, Results>(
    instance: &Instance,
    store: &mut Store<()>,
    name: &str,
) -> Result<TypedFunc<Params, Results>>
where
    Params: WasmParams,
    Results: WasmResults,
{
    instance
        .get_typed_func(&mut *store, name)
        .map_err(|err| Error::Setup(format!("engine export `{name}` is missing or mistyped: {err}")))
}

/// `env.fill_random(ptr, len) -> i32`: 0 on success, 1 for an empty range or one outside guest
/// memory.
fn fill_random(mut caller: Caller<'_, ()>, ptr: i32, len: i32) -> i32 {
    let (Ok(start), Ok(len)) = (usize::try_from(ptr), usize::try_from(len)) else {
        return 1;
    };
    let Some(memory) = caller.get_export("memory").and_then(Extern::into_memory) else {
        return 1;
    };

    let data = memory.data_mut(&mut caller);
    match start.checked_add(len).and_then(|end| data.get_mut(start..end)) {
        Some(bytes) if !bytes.is_empty() => {
            rand::thread_rng().fill_bytes(bytes);
            0
        }
        _ => 1,
    }
}

impl GuestMemory for WasmModule {
    fn alloc(&mut self, len: u32) -> Result<u32> {
        Ok(self.exports.alloc.call(&mut self.store, len as i32)? as u32)
    }

    fn dealloc(&mut self, offset: u32, len: u32) -> Result<()> {
        Ok(self
            .exports
            .dealloc
            .call(&mut self.store, (offset as i32, len as i32))?)
    }

    fn dealloc_response(&mut self, offset: u32, len: u32) -> Result<()> {
        Ok(self
            .exports
            .dealloc_response
            .call(&mut self.store, (offset as i32, len as i32))?)
    }

    fn read(&mut self, offset: u32, len: u32) -> Result<Vec<u8>> {
        let start = offset as usize;
        let data = self.memory.data(&self.store);
        start
            .checked_add(len as usize)
            .and_then(|end| data.get(start..end))
            .map(<[u8]>::to_vec)
            .ok_or_else(|| {
                Error::parse(
                    format!("response at {offset} with length {len} is out of bounds"),
                    &[],
                )
            })
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<()> {
        self.memory
            .write(&mut self.store, offset as usize, bytes)
            .map_err(|err| {
                Error::InvalidInput(format!(
                    "request buffer at {offset} does not fit module memory: {err}"
                ))
            })
    }

    fn read_c_str(&mut self, offset: u32) -> Result<Vec<u8>> {
        nul_terminated(self.memory.data(&self.store), offset)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| {
                Error::parse(format!("string at {offset} runs past module memory"), &[])
            })
    }
}

impl SandboxModule for WasmModule {
    fn new_engine(&mut self, now_ms: i64) -> Result<u32> {
        Ok(self.exports.new_engine.call(&mut self.store, now_ms)? as u32)
    }

    fn free_engine(&mut self, engine: u32) -> Result<()> {
        Ok(self.exports.free_engine.call(&mut self.store, engine as i32)?)
    }

    fn take_state(&mut self, engine: u32, offset: u32, len: u32) -> Result<u32> {
        let text = self
            .exports
            .take_state
            .call(&mut self.store, (engine as i32, offset as i32, len as i32))?;
        Ok(text as u32)
    }

    fn get_state(&mut self, engine: u32) -> Result<u32> {
        Ok(self.exports.get_state.call(&mut self.store, engine as i32)? as u32)
    }

    fn check_enabled(&mut self, engine: u32, offset: u32, len: u32) -> Result<u64> {
        let packed = self
            .exports
            .check_enabled
            .call(&mut self.store, (engine as i32, offset as i32, len as i32))?;
        Ok(packed as u64)
    }

    fn check_variant(&mut self, engine: u32, offset: u32, len: u32) -> Result<u64> {
        let packed = self
            .exports
            .check_variant
            .call(&mut self.store, (engine as i32, offset as i32, len as i32))?;
        Ok(packed as u64)
    }

    fn get_metrics(&mut self, engine: u32, now_ms: i64) -> Result<u64> {
        let packed = self
            .exports
            .get_metrics
            .call(&mut self.store, (engine as i32, now_ms))?;
        Ok(packed as u64)
    }

    fn list_known_toggles(&mut self, engine: u32) -> Result<u64> {
        Ok(self
            .exports
            .list_known_toggles
            .call(&mut self.store, engine as i32)? as u64)
    }

    fn get_built_in_strategies(&mut self) -> Result<u64> {
        Ok(self
            .exports
            .get_built_in_strategies
            .call(&mut self.store, ())? as u64)
    }

    fn get_core_version(&mut self) -> Result<u64> {
        Ok(self.exports.get_core_version.call(&mut self.store, ())? as u64)
    }

    /// The module keeps only its most recent line, NUL-terminated, and the host may only read
    /// it. A line equal to the one handed out last is not returned again.
    fn drain_log(&mut self) -> Result<Option<String>> {
        let ptr = self.exports.get_log_buffer_ptr.call(&mut self.store, ())? as u32 as usize;

        let data = self.memory.data(&self.store);
        let Some(tail) = data.get(ptr..) else {
            return Ok(None);
        };
        let tail = &tail[..tail.len().min(LOG_BUFFER_LEN)];
        let line = match tail.iter().position(|byte| *byte == 0) {
            Some(0) | None => return Ok(None),
            Some(end) => String::from_utf8_lossy(&tail[..end]).into_owned(),
        };

        if self.last_log.as_deref() == Some(line.as_str()) {
            return Ok(None);
        }
        self.last_log = Some(line.clone());
        Ok(Some(line))
    }
}
