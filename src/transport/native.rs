//! The engine as a native shared library (`libyggdrasilffi`), spoken to in JSON.
use std::{
    ffi::{c_char, c_void, CStr, CString, OsStr},
    path::{Path, PathBuf},
    ptr::NonNull,
};

use chrono::{DateTime, Utc};
use libloading::Library;
use serde::de::IgnoredAny;

use crate::{
    codec::{json, EvaluationRequest},
    response::{EvaluationResponse, Status, StateWarning, ToggleDefinition, VariantDef},
    Error, MetricsBucket, Result,
};

use super::Transport;

/// Environment variable holding the directory that contains the engine library.
pub const LIB_PATH_ENV: &str = "YGGDRASIL_LIB_PATH";

const LIBRARY_NAME: &str = "yggdrasilffi";

/// What the engine returns from `get_state` before any state was taken.
const EMPTY_STATE: &str = r#"{"version":2,"features":[]}"#;

type Response = *const c_char;

/// Entry points resolved once at load time. Valid for as long as the owning [`Library`] is.
struct Symbols {
    new_engine: unsafe extern "C" fn() -> *mut c_void,
    free_engine: unsafe extern "C" fn(*mut c_void),
    take_state: unsafe extern "C" fn(*mut c_void, *const c_char) -> Response,
    get_state: unsafe extern "C" fn(*mut c_void) -> Response,
    check_enabled:
        unsafe extern "C" fn(*mut c_void, *const c_char, *const c_char, *const c_char) -> Response,
    check_variant:
        unsafe extern "C" fn(*mut c_void, *const c_char, *const c_char, *const c_char) -> Response,
    count_toggle: unsafe extern "C" fn(*mut c_void, *const c_char, u8) -> Response,
    count_variant: unsafe extern "C" fn(*mut c_void, *const c_char, *const c_char) -> Response,
    should_emit_impression_event: unsafe extern "C" fn(*mut c_void, *const c_char) -> Response,
    get_metrics: unsafe extern "C" fn(*mut c_void) -> Response,
    list_known_toggles: unsafe extern "C" fn(*mut c_void) -> Response,
    built_in_strategies: unsafe extern "C" fn() -> Response,
    get_core_version: unsafe extern "C" fn() -> Response,
    free_response: unsafe extern "C" fn(*mut c_char),
}

impl Symbols {
    /// # Safety
    ///
    /// `library` must be the engine library, so that every symbol has the declared signature.
    unsafe fn load(library: &Library) -> Result<Symbols> {
        Ok(Symbols {
            new_engine: symbol(library, "new_engine")?,
            free_engine: symbol(library, "free_engine")?,
            take_state: symbol(library, "take_state")?,
            get_state: symbol(library, "get_state")?,
            check_enabled: symbol(library, "check_enabled")?,
            check_variant: symbol(library, "check_variant")?,
            count_toggle: symbol(library, "count_toggle")?,
            count_variant: symbol(library, "count_variant")?,
            should_emit_impression_event: symbol(library, "should_emit_impression_event")?,
            get_metrics: symbol(library, "get_metrics")?,
            list_known_toggles: symbol(library, "list_known_toggles")?,
            built_in_strategies: symbol(library, "built_in_strategies")?,
            get_core_version: symbol(library, "get_core_version")?,
            free_response: symbol(library, "free_response")?,
        })
    }
}

unsafe fn symbol<T: Copy>(library: &Library, name: &str) -> Result<T> {
    library
        .get::<T>(name.as_bytes())
        .map(|symbol| *symbol)
        .map_err(|err| Error::Setup(format!("engine library has no `{name}` symbol: {err}")))
}

/// Pointer to an engine instance owned by the native library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeEngine(NonNull<c_void>);

// The library guards every engine instance with its own lock.
unsafe impl Send for NativeEngine {}

/// [`Transport`] over the native engine library.
pub struct NativeTransport {
    symbols: Symbols,
    // Must outlive `symbols`. `None` only when the symbols are not library exports.
    _library: Option<Library>,
}

impl NativeTransport {
    /// Load the library at `path`.
    pub fn from_path(path: impl AsRef<OsStr>) -> Result<NativeTransport> {
        let path = path.as_ref();
        // SAFETY: loading runs the library's initializers; the engine library has none with
        // preconditions.
        let library = unsafe { Library::new(path) }.map_err(|err| {
            Error::Setup(format!(
                "failed to load engine library {}: {err}",
                Path::new(path).display()
            ))
        })?;
        // SAFETY: symbol signatures match the engine library's exports.
        let symbols = unsafe { Symbols::load(&library)? };
        log::debug!(target: "yggdrasil", "loaded native engine library from {}", Path::new(path).display());

        Ok(NativeTransport {
            symbols,
            _library: Some(library),
        })
    }

    #[cfg(test)]
    fn from_symbols(symbols: Symbols) -> NativeTransport {
        NativeTransport {
            symbols,
            _library: None,
        }
    }

    /// Load the platform-named library (`libyggdrasilffi.so`, `yggdrasilffi.dll`, ...) from `dir`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<NativeTransport> {
        NativeTransport::from_path(library_path(dir.as_ref()))
    }

    /// Load the library from the directory in `YGGDRASIL_LIB_PATH`, or the working directory.
    pub fn from_env() -> Result<NativeTransport> {
        let dir = std::env::var_os(LIB_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        NativeTransport::from_dir(dir)
    }

    /// Copy a response string, then hand it back to the library.
    ///
    /// # Safety
    ///
    /// `response` must come from an engine call whose result is released with `free_response`.
    unsafe fn take(&self, response: Response) -> Result<Vec<u8>> {
        if response.is_null() {
            return Err(Error::parse("engine returned a null response", &[]));
        }
        let bytes = CStr::from_ptr(response).to_bytes().to_vec();
        (self.symbols.free_response)(response.cast_mut());
        Ok(bytes)
    }

    fn count_toggle(&self, instance: NativeEngine, toggle_name: &CStr, enabled: bool) -> Result<()> {
        // SAFETY: live instance, NUL-terminated arguments, response released by `take`.
        let bytes = unsafe {
            self.take((self.symbols.count_toggle)(
                instance.0.as_ptr(),
                toggle_name.as_ptr(),
                u8::from(enabled),
            ))?
        };
        json::decode_response::<IgnoredAny>(&bytes)?.into_value()?;
        Ok(())
    }

    fn count_variant(&self, instance: NativeEngine, toggle_name: &CStr, variant: &str) -> Result<()> {
        let variant = c_string(variant)?;
        // SAFETY: live instance, NUL-terminated arguments, response released by `take`.
        let bytes = unsafe {
            self.take((self.symbols.count_variant)(
                instance.0.as_ptr(),
                toggle_name.as_ptr(),
                variant.as_ptr(),
            ))?
        };
        json::decode_response::<IgnoredAny>(&bytes)?.into_value()?;
        Ok(())
    }

    fn should_emit_impression_event(&self, instance: NativeEngine, toggle_name: &CStr) -> Result<bool> {
        // SAFETY: live instance, NUL-terminated argument, response released by `take`.
        let bytes = unsafe {
            self.take((self.symbols.should_emit_impression_event)(
                instance.0.as_ptr(),
                toggle_name.as_ptr(),
            ))?
        };
        Ok(json::decode_response::<bool>(&bytes)?
            .into_value()?
            .unwrap_or(false))
    }

    fn evaluate<T: serde::de::DeserializeOwned>(
        &self,
        instance: NativeEngine,
        request: &EvaluationRequest<'_>,
        entry_point: unsafe extern "C" fn(
            *mut c_void,
            *const c_char,
            *const c_char,
            *const c_char,
        ) -> Response,
    ) -> Result<(CString, EvaluationResponse<T>)> {
        let encoded = json::encode_request(request)?;
        let toggle_name = c_string(&encoded.toggle_name)?;
        let context = c_string(&encoded.context)?;
        let results = c_string(&encoded.custom_strategy_results)?;
        log::trace!(target: "yggdrasil", toggle_name = request.toggle_name; "evaluating in native engine");

        // SAFETY: live instance, NUL-terminated arguments, response released by `take`.
        let bytes = unsafe {
            self.take(entry_point(
                instance.0.as_ptr(),
                toggle_name.as_ptr(),
                context.as_ptr(),
                results.as_ptr(),
            ))?
        };
        let response = json::decode_response::<T>(&bytes)?;
        Ok((toggle_name, response))
    }
}

fn library_path(dir: &Path) -> PathBuf {
    dir.join(libloading::library_filename(LIBRARY_NAME))
}

fn c_string(value: &str) -> Result<CString> {
    CString::new(value).map_err(|_| {
        Error::InvalidInput(format!(
            "{value:?} contains a NUL byte and cannot be sent to the engine"
        ))
    })
}

impl Transport for NativeTransport {
    type Instance = NativeEngine;

    fn new_engine(&mut self) -> Result<NativeEngine> {
        // SAFETY: no preconditions.
        let engine = unsafe { (self.symbols.new_engine)() };
        let engine = NonNull::new(engine)
            .ok_or_else(|| Error::Setup("engine library failed to create an engine".to_owned()))?;
        log::debug!(target: "yggdrasil", "created native engine at {engine:p}");
        Ok(NativeEngine(engine))
    }

    fn free_engine(&mut self, instance: NativeEngine) -> Result<()> {
        log::debug!(target: "yggdrasil", "freeing native engine at {:p}", instance.0);
        // SAFETY: `instance` came from `new_engine` and is freed once by the owning handle.
        unsafe { (self.symbols.free_engine)(instance.0.as_ptr()) };
        Ok(())
    }

    fn take_state(
        &mut self,
        instance: NativeEngine,
        state: &str,
    ) -> Result<EvaluationResponse<Vec<StateWarning>>> {
        let state = c_string(state)?;
        // SAFETY: live instance, NUL-terminated argument, response released by `take`.
        let bytes =
            unsafe { self.take((self.symbols.take_state)(instance.0.as_ptr(), state.as_ptr()))? };
        // Partial updates come back as an error status carrying the warnings in its message.
        let response = json::decode_response::<IgnoredAny>(&bytes)?;
        Ok(EvaluationResponse {
            value: (response.status == Status::Ok).then(Vec::new),
            status: response.status,
            error_message: response.error_message,
            impression_data: false,
        })
    }

    fn get_state(&mut self, instance: NativeEngine) -> Result<String> {
        // SAFETY: live instance, response released by `take`.
        let bytes = unsafe { self.take((self.symbols.get_state)(instance.0.as_ptr()))? };
        let state = json::decode_response::<serde_json::Value>(&bytes)?.into_value()?;
        Ok(state.map_or_else(|| EMPTY_STATE.to_owned(), |state| state.to_string()))
    }

    fn check_enabled(
        &mut self,
        instance: NativeEngine,
        request: &EvaluationRequest<'_>,
    ) -> Result<EvaluationResponse<bool>> {
        let (toggle_name, mut response) =
            self.evaluate::<bool>(instance, request, self.symbols.check_enabled)?;

        if response.status != Status::Error {
            self.count_toggle(instance, &toggle_name, response.value.unwrap_or(false))?;
        }
        if response.status == Status::Ok {
            response.impression_data = self.should_emit_impression_event(instance, &toggle_name)?;
        }
        Ok(response)
    }

    fn check_variant(
        &mut self,
        instance: NativeEngine,
        request: &EvaluationRequest<'_>,
    ) -> Result<EvaluationResponse<VariantDef>> {
        let (toggle_name, mut response) =
            self.evaluate::<VariantDef>(instance, request, self.symbols.check_variant)?;

        if response.status != Status::Error {
            let (enabled, variant) = match &response.value {
                Some(variant) => (variant.feature_enabled, variant.name.as_str()),
                None => (false, "disabled"),
            };
            self.count_toggle(instance, &toggle_name, enabled)?;
            self.count_variant(instance, &toggle_name, variant)?;
        }
        if response.status == Status::Ok {
            response.impression_data = self.should_emit_impression_event(instance, &toggle_name)?;
        }
        Ok(response)
    }

    /// The library stamps the window itself, so `now` is not forwarded.
    fn get_metrics(
        &mut self,
        instance: NativeEngine,
        _now: DateTime<Utc>,
    ) -> Result<Option<MetricsBucket>> {
        // SAFETY: live instance, response released by `take`.
        let bytes = unsafe { self.take((self.symbols.get_metrics)(instance.0.as_ptr()))? };
        json::decode_metrics(&bytes)
    }

    fn list_known_toggles(&mut self, instance: NativeEngine) -> Result<Vec<ToggleDefinition>> {
        // SAFETY: live instance, response released by `take`.
        let bytes = unsafe { self.take((self.symbols.list_known_toggles)(instance.0.as_ptr()))? };
        Ok(json::decode_response::<Vec<ToggleDefinition>>(&bytes)?
            .into_value()?
            .unwrap_or_default())
    }

    fn built_in_strategies(&mut self) -> Result<Vec<String>> {
        // SAFETY: no preconditions, response released by `take`.
        let bytes = unsafe { self.take((self.symbols.built_in_strategies)())? };
        json::decode_built_in_strategies(&bytes)
    }

    fn core_version(&mut self) -> Result<String> {
        // SAFETY: returns a static string owned by the library. It must not be freed.
        let version = unsafe {
            let version = (self.symbols.get_core_version)();
            if version.is_null() {
                return Err(Error::parse("engine returned a null core version", &[]));
            }
            CStr::from_ptr(version)
        };
        version
            .to_str()
            .map(str::to_owned)
            .map_err(|err| Error::parse(format!("core version is not UTF-8: {err}"), version.to_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::{Cell, RefCell},
        collections::BTreeMap,
        ffi::{c_char, c_void, CStr, CString},
        path::Path,
    };

    use serde_json::{json, Value};

    use crate::{
        codec::EvaluationRequest, response::Status, transport::Transport, Context, Error,
    };

    use super::{c_string, library_path, NativeEngine, NativeTransport, Response, Symbols};

    thread_local! {
        static LIVE_RESPONSES: Cell<i64> = Cell::new(0);
    }

    /// In-process stand-in for one engine instance of the library.
    #[derive(Default)]
    struct FakeLibraryEngine {
        features: RefCell<BTreeMap<String, Value>>,
        counted: RefCell<Vec<String>>,
        impression_lookups: Cell<usize>,
    }

    fn respond(value: Value) -> Response {
        LIVE_RESPONSES.with(|live| live.set(live.get() + 1));
        CString::new(value.to_string()).unwrap().into_raw().cast_const()
    }

    fn ok(value: Value) -> Response {
        respond(json!({"status_code": "Ok", "value": value, "error_message": null}))
    }

    fn not_found() -> Response {
        respond(json!({"status_code": "NotFound", "value": null, "error_message": null}))
    }

    unsafe fn fake<'a>(engine: *mut c_void) -> &'a FakeLibraryEngine {
        &*engine.cast::<FakeLibraryEngine>()
    }

    unsafe fn text(value: *const c_char) -> String {
        CStr::from_ptr(value).to_string_lossy().into_owned()
    }

    unsafe fn feature(engine: *mut c_void, toggle_name: *const c_char) -> Option<Value> {
        fake(engine).features.borrow().get(&text(toggle_name)).cloned()
    }

    unsafe extern "C" fn new_engine() -> *mut c_void {
        Box::into_raw(Box::<FakeLibraryEngine>::default()).cast()
    }

    unsafe extern "C" fn free_engine(engine: *mut c_void) {
        drop(Box::from_raw(engine.cast::<FakeLibraryEngine>()));
    }

    unsafe extern "C" fn take_state(engine: *mut c_void, state: *const c_char) -> Response {
        let state: Value = serde_json::from_str(&text(state)).unwrap_or_default();
        let features = state["features"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|feature| Some((feature["name"].as_str()?.to_owned(), feature.clone())))
            .collect();
        *fake(engine).features.borrow_mut() = features;
        ok(Value::Null)
    }

    unsafe extern "C" fn get_state(_engine: *mut c_void) -> Response {
        ok(Value::Null)
    }

    unsafe extern "C" fn check_enabled(
        engine: *mut c_void,
        toggle_name: *const c_char,
        _context: *const c_char,
        _results: *const c_char,
    ) -> Response {
        match feature(engine, toggle_name) {
            Some(feature) => ok(json!(feature["enabled"].as_bool().unwrap_or(false))),
            None => not_found(),
        }
    }

    /// Resolves the first variant of an enabled toggle, and no value at all when it has none.
    unsafe extern "C" fn check_variant(
        engine: *mut c_void,
        toggle_name: *const c_char,
        _context: *const c_char,
        _results: *const c_char,
    ) -> Response {
        let Some(feature) = feature(engine, toggle_name) else {
            return not_found();
        };
        let enabled = feature["enabled"].as_bool().unwrap_or(false);
        match feature["variants"].get(0).filter(|_| enabled) {
            Some(variant) => ok(json!({
                "name": variant["name"],
                "payload": null,
                "enabled": true,
                "feature_enabled": enabled,
            })),
            None => ok(Value::Null),
        }
    }

    unsafe extern "C" fn count_toggle(
        engine: *mut c_void,
        toggle_name: *const c_char,
        enabled: u8,
    ) -> Response {
        let line = format!("{}={enabled}", text(toggle_name));
        fake(engine).counted.borrow_mut().push(line);
        ok(Value::Null)
    }

    unsafe extern "C" fn count_variant(
        engine: *mut c_void,
        toggle_name: *const c_char,
        variant: *const c_char,
    ) -> Response {
        let line = format!("{}:{}", text(toggle_name), text(variant));
        fake(engine).counted.borrow_mut().push(line);
        ok(Value::Null)
    }

    unsafe extern "C" fn should_emit_impression_event(
        engine: *mut c_void,
        toggle_name: *const c_char,
    ) -> Response {
        let lookups = &fake(engine).impression_lookups;
        lookups.set(lookups.get() + 1);
        let impression = feature(engine, toggle_name)
            .and_then(|feature| feature["impressionData"].as_bool())
            .unwrap_or(false);
        ok(json!(impression))
    }

    unsafe extern "C" fn get_metrics(_engine: *mut c_void) -> Response {
        ok(Value::Null)
    }

    unsafe extern "C" fn list_known_toggles(_engine: *mut c_void) -> Response {
        ok(json!([]))
    }

    unsafe extern "C" fn built_in_strategies() -> Response {
        respond(json!(["default"]))
    }

    unsafe extern "C" fn get_core_version() -> Response {
        b"0.17.0\0".as_ptr().cast()
    }

    unsafe extern "C" fn free_response(response: *mut c_char) {
        LIVE_RESPONSES.with(|live| live.set(live.get() - 1));
        drop(CString::from_raw(response));
    }

    const STATE: &str = r#"{
      "version": 2,
      "features": [
        {"name": "loud", "enabled": true, "impressionData": true},
        {"name": "quiet", "enabled": true},
        {"name": "colors", "enabled": true, "variants": [{"name": "red"}]},
        {"name": "plain", "enabled": true}
      ]
    }"#;

    fn fake_transport() -> (NativeTransport, NativeEngine) {
        let mut transport = NativeTransport::from_symbols(Symbols {
            new_engine,
            free_engine,
            take_state,
            get_state,
            check_enabled,
            check_variant,
            count_toggle,
            count_variant,
            should_emit_impression_event,
            get_metrics,
            list_known_toggles,
            built_in_strategies,
            get_core_version,
            free_response,
        });
        let engine = transport.new_engine().unwrap();
        transport.take_state(engine, STATE).unwrap();
        (transport, engine)
    }

    fn engine_side(engine: NativeEngine) -> &'static FakeLibraryEngine {
        // SAFETY: the instance is alive until the test frees it, after its last use.
        unsafe { fake(engine.0.as_ptr()) }
    }

    #[test]
    fn library_name_follows_platform_convention() {
        let path = library_path(Path::new("/opt/yggdrasil"));
        let file_name = path.file_name().unwrap().to_str().unwrap();

        assert!(path.starts_with("/opt/yggdrasil"));
        assert!(file_name.contains("yggdrasilffi"));
    }

    #[test]
    fn missing_library_is_a_setup_error() {
        let result = NativeTransport::from_dir("/nonexistent/yggdrasil");

        match result {
            Err(Error::Setup(message)) => assert!(message.contains("yggdrasilffi")),
            _ => panic!("expected a setup error"),
        }
    }

    #[test]
    fn nul_bytes_are_invalid_input() {
        assert!(matches!(c_string("a\0b"), Err(Error::InvalidInput(_))));
        assert_eq!(c_string("plain").unwrap().as_bytes(), b"plain");
    }

    #[test]
    fn impression_flag_is_looked_up_for_known_toggles() {
        let (mut transport, engine) = fake_transport();
        let context = Context::new();
        let results = BTreeMap::new();
        let mut check = |toggle_name| {
            transport
                .check_enabled(engine, &EvaluationRequest::new(toggle_name, &context, &results))
                .unwrap()
        };

        let loud = check("loud");
        let quiet = check("quiet");
        let missing = check("missing");

        assert_eq!(loud.value, Some(true));
        assert!(loud.impression_data);
        assert_eq!(quiet.value, Some(true));
        assert!(!quiet.impression_data);
        assert_eq!(missing.status, Status::NotFound);
        assert!(!missing.impression_data);

        let fake = engine_side(engine);
        assert_eq!(fake.impression_lookups.get(), 2);
        assert_eq!(*fake.counted.borrow(), ["loud=1", "quiet=1", "missing=0"]);
        transport.free_engine(engine).unwrap();
    }

    #[test]
    fn variants_are_counted_by_name_or_as_disabled() {
        let (mut transport, engine) = fake_transport();
        let context = Context::new();
        let results = BTreeMap::new();
        let mut check = |toggle_name| {
            transport
                .check_variant(engine, &EvaluationRequest::new(toggle_name, &context, &results))
                .unwrap()
        };

        let colors = check("colors");
        let plain = check("plain");
        let missing = check("missing");

        assert_eq!(colors.value.unwrap().name, "red");
        assert_eq!(plain.status, Status::Ok);
        assert_eq!(plain.value, None);
        assert_eq!(missing.status, Status::NotFound);

        let fake = engine_side(engine);
        assert_eq!(
            *fake.counted.borrow(),
            [
                "colors=1",
                "colors:red",
                "plain=0",
                "plain:disabled",
                "missing=0",
                "missing:disabled",
            ]
        );
        assert_eq!(fake.impression_lookups.get(), 2);
        transport.free_engine(engine).unwrap();
    }

    #[test]
    fn every_response_is_handed_back() {
        let (mut transport, engine) = fake_transport();
        let context = Context::new();
        let results = BTreeMap::new();
        let request = EvaluationRequest::new("colors", &context, &results);

        transport.check_enabled(engine, &request).unwrap();
        transport.check_variant(engine, &request).unwrap();
        assert_eq!(
            transport.get_state(engine).unwrap(),
            r#"{"version":2,"features":[]}"#
        );
        assert_eq!(transport.get_metrics(engine, chrono::Utc::now()).unwrap(), None);
        assert!(transport.list_known_toggles(engine).unwrap().is_empty());
        assert_eq!(transport.built_in_strategies().unwrap(), ["default"]);
        assert_eq!(transport.core_version().unwrap(), "0.17.0");
        transport.free_engine(engine).unwrap();

        assert_eq!(LIVE_RESPONSES.with(Cell::get), 0);
    }
}
