//! In-memory stand-ins for the sandboxed engine, used by unit tests.
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Utc};
use flatbuffers::{FlatBufferBuilder, ForwardsUOffset, Vector};
use serde_json::{json, Value};

use crate::{
    codec::messaging::{
        finish, BuiltInStrategies, ContextMessage, CoreVersion, FeatureDefs, MetricsBucket,
        PropertyEntry, Response, ToggleStatsArgs, Variant, VariantArgs,
    },
    packed::{nul_terminated, GuestMemory, PackedPointer},
    transport::sandbox::SandboxModule,
    Context, Error, Result,
};

/// Bump-allocated linear memory that remembers every allocation and release.
pub(crate) struct FakeMemory {
    bytes: Vec<u8>,
    live: BTreeMap<u32, u32>,
    allocations: Vec<u32>,
    response_releases: Vec<(u32, u32)>,
    reads: usize,
}

impl Default for FakeMemory {
    fn default() -> Self {
        FakeMemory {
            // Offset 0 is never handed out.
            bytes: vec![0; 8],
            live: BTreeMap::new(),
            allocations: Vec::new(),
            response_releases: Vec::new(),
            reads: 0,
        }
    }
}

impl FakeMemory {
    fn allocate(&mut self, len: u32) -> u32 {
        let offset = self.bytes.len() as u32;
        self.bytes.resize(self.bytes.len() + len.max(1) as usize, 0);
        self.live.insert(offset, len);
        offset
    }

    fn release(&mut self, offset: u32, len: u32) -> Result<()> {
        match self.live.remove(&offset) {
            Some(allocated) if allocated == len => Ok(()),
            Some(allocated) => Err(Error::Engine(format!(
                "buffer at {offset} has length {allocated}, released with {len}"
            ))),
            None => Err(Error::Engine(format!("buffer at {offset} is not allocated"))),
        }
    }

    fn range(&self, offset: u32, len: u32) -> Result<std::ops::Range<usize>> {
        let start = offset as usize;
        let end = start + len as usize;
        if end > self.bytes.len() {
            return Err(Error::parse(
                format!("range {start}..{end} is outside guest memory"),
                &[],
            ));
        }
        Ok(start..end)
    }

    /// Place a response the way the module would and return its packed pointer.
    pub(crate) fn respond(&mut self, bytes: &[u8]) -> PackedPointer {
        let len = bytes.len() as u32;
        let offset = self.allocate(len);
        self.bytes[offset as usize..offset as usize + bytes.len()].copy_from_slice(bytes);
        PackedPointer::new(offset, len)
    }

    /// Place a NUL-terminated string the module keeps ownership of.
    pub(crate) fn c_string(&mut self, bytes: &[u8]) -> u32 {
        let offset = self.bytes.len() as u32;
        self.bytes.extend_from_slice(bytes);
        self.bytes.push(0);
        offset
    }

    /// Lengths passed to [`GuestMemory::alloc`], in call order.
    pub(crate) fn allocations(&self) -> Vec<u32> {
        self.allocations.clone()
    }

    pub(crate) fn response_releases(&self) -> Vec<(u32, u32)> {
        self.response_releases.clone()
    }

    /// Buffers that were handed out and not yet released.
    pub(crate) fn live(&self) -> Vec<(u32, u32)> {
        self.live.iter().map(|(offset, len)| (*offset, *len)).collect()
    }

    pub(crate) fn reads(&self) -> usize {
        self.reads
    }
}

impl GuestMemory for FakeMemory {
    fn alloc(&mut self, len: u32) -> Result<u32> {
        self.allocations.push(len);
        Ok(self.allocate(len))
    }

    fn dealloc(&mut self, offset: u32, len: u32) -> Result<()> {
        self.release(offset, len)
    }

    fn dealloc_response(&mut self, offset: u32, len: u32) -> Result<()> {
        self.release(offset, len)?;
        self.response_releases.push((offset, len));
        Ok(())
    }

    fn read(&mut self, offset: u32, len: u32) -> Result<Vec<u8>> {
        self.reads += 1;
        let range = self.range(offset, len)?;
        Ok(self.bytes[range].to_vec())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<()> {
        let range = self.range(offset, bytes.len() as u32)?;
        self.bytes[range].copy_from_slice(bytes);
        Ok(())
    }

    fn read_c_str(&mut self, offset: u32) -> Result<Vec<u8>> {
        self.reads += 1;
        nul_terminated(&self.bytes, offset)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| Error::parse(format!("no string terminator after {offset}"), &[]))
    }
}

/// Request as the engine side sees it.
#[derive(Debug)]
pub(crate) struct DecodedRequest {
    pub toggle_name: String,
    pub context: Context,
    pub custom_strategy_results: BTreeMap<String, bool>,
}

fn entries<'a>(
    entries: Option<Vector<'a, ForwardsUOffset<PropertyEntry<'a>>>>,
) -> Vec<(String, String)> {
    entries
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| Some((entry.key()?.to_owned(), entry.value()?.to_owned())))
                .collect()
        })
        .unwrap_or_default()
}

/// Engine-side decoding of a [`ContextMessage`].
pub(crate) fn decode_request(bytes: &[u8]) -> DecodedRequest {
    let message = flatbuffers::root::<ContextMessage>(bytes).unwrap();
    DecodedRequest {
        toggle_name: message.toggle_name().unwrap_or_default().to_owned(),
        context: Context {
            user_id: message.user_id().map(str::to_owned),
            session_id: message.session_id().map(str::to_owned),
            remote_address: message.remote_address().map(str::to_owned),
            environment: message.environment().map(str::to_owned),
            current_time: message
                .current_time()
                .and_then(|time| DateTime::parse_from_rfc3339(time).ok())
                .map(|time| time.with_timezone(&Utc)),
            app_name: message.app_name().map(str::to_owned),
            properties: entries(message.properties()).into_iter().collect(),
        },
        custom_strategy_results: entries(message.custom_strategies_results())
            .into_iter()
            .map(|(slot, value)| (slot, value == "true"))
            .collect(),
    }
}

/// Counters shared between a [`FakeModule`] and the test that built it, so they stay readable
/// after the module has been moved into an engine and dropped.
#[derive(Debug, Default)]
pub(crate) struct ModuleStats {
    pub created: Vec<u32>,
    pub freed: Vec<u32>,
    pub evaluations: usize,
    pub live_buffers: usize,
}

#[derive(Default)]
struct ToyCounts {
    yes: u32,
    no: u32,
    variants: BTreeMap<String, u32>,
}

#[derive(Default)]
struct ToyEngine {
    state: Option<String>,
    features: BTreeMap<String, Value>,
    counts: BTreeMap<String, ToyCounts>,
    window_start: i64,
}

/// A deliberately small engine speaking the flatbuffer protocol: a toggle is enabled when its
/// `enabled` flag is set and any of its strategies passes. `default` always passes, other built-in
/// strategies never do, and any other strategy reads the next `customStrategyN` slot.
pub(crate) struct FakeModule {
    memory: FakeMemory,
    engines: HashMap<u32, ToyEngine>,
    next_engine: u32,
    stats: Arc<Mutex<ModuleStats>>,
    log: Vec<String>,
    pub core_version: String,
    pub built_in: Vec<String>,
    /// Make the next `check_enabled` fail as if the module trapped.
    pub trap_next_evaluation: bool,
    pub fail_built_in_strategies: bool,
}

impl FakeModule {
    pub(crate) fn new() -> FakeModule {
        FakeModule {
            memory: FakeMemory::default(),
            engines: HashMap::new(),
            next_engine: 1,
            stats: Arc::new(Mutex::new(ModuleStats::default())),
            log: Vec::new(),
            core_version: "0.17.0".to_owned(),
            built_in: vec!["default".to_owned(), "flexibleRollout".to_owned()],
            trap_next_evaluation: false,
            fail_built_in_strategies: false,
        }
    }

    pub(crate) fn stats(&self) -> Arc<Mutex<ModuleStats>> {
        self.stats.clone()
    }

    fn sync_stats(&self) {
        self.stats.lock().unwrap().live_buffers = self.memory.live.len();
    }

    fn engine(&mut self, engine: u32) -> Result<&mut ToyEngine> {
        self.engines
            .get_mut(&engine)
            .ok_or_else(|| Error::Engine(format!("engine {engine} is not alive")))
    }

    fn respond(&mut self, bytes: Vec<u8>) -> u64 {
        let pointer = self.memory.respond(&bytes);
        self.sync_stats();
        pointer.into()
    }

    fn request(&mut self, offset: u32, len: u32) -> Result<Vec<u8>> {
        self.memory.read(offset, len)
    }

    fn evaluate<'a>(
        engine: &'a ToyEngine,
        built_in: &[String],
        request: &DecodedRequest,
    ) -> Option<(bool, &'a Value)> {
        let feature = engine.features.get(&request.toggle_name)?;
        let strategies = feature["strategies"].as_array().cloned().unwrap_or_default();
        let mut slot = 0;
        let passes = strategies.is_empty()
            || strategies.iter().fold(false, |passed, strategy| {
                let name = strategy["name"].as_str().unwrap_or_default();
                let passes = if name == "default" {
                    true
                } else if built_in.iter().any(|built_in| built_in == name) {
                    false
                } else {
                    slot += 1;
                    request
                        .custom_strategy_results
                        .get(&format!("customStrategy{slot}"))
                        .copied()
                        .unwrap_or(false)
                };
                passed || passes
            });
        let enabled = feature["enabled"].as_bool().unwrap_or(false) && passes;
        Some((enabled, feature))
    }

    fn check(&mut self, engine: u32, offset: u32, len: u32, variant: bool) -> Result<u64> {
        if std::mem::take(&mut self.trap_next_evaluation) {
            return Err(Error::Engine("unreachable executed".to_owned()));
        }
        let request = decode_request(&self.request(offset, len)?);
        self.stats.lock().unwrap().evaluations += 1;
        self.log.push(format!("evaluated {}", request.toggle_name));

        let built_in = self.built_in.clone();
        let toy = self.engine(engine)?;
        let mut fbb = FlatBufferBuilder::new();
        let Some((enabled, feature)) = Self::evaluate(toy, &built_in, &request) else {
            let bytes = if variant {
                let root = Variant::create(&mut fbb, None, None);
                finish(fbb, root)
            } else {
                let root = Response::create(&mut fbb, None, false, None);
                finish(fbb, root)
            };
            return Ok(self.respond(bytes));
        };
        let impression = feature["impressionData"].as_bool().unwrap_or(false);
        let first_variant = feature["variants"]
            .as_array()
            .and_then(|variants| variants.first())
            .filter(|_| enabled)
            .cloned();

        let counts = toy.counts.entry(request.toggle_name.clone()).or_default();
        if enabled {
            counts.yes += 1;
        } else {
            counts.no += 1;
        }

        let bytes = if variant {
            let name = first_variant
                .as_ref()
                .and_then(|variant| variant["name"].as_str())
                .unwrap_or("disabled");
            *counts.variants.entry(name.to_owned()).or_default() += 1;
            let payload = first_variant
                .as_ref()
                .and_then(|variant| variant["payload"].as_object())
                .map(|payload| {
                    (
                        payload["type"].as_str().unwrap_or_default(),
                        payload["value"].as_str().unwrap_or_default(),
                    )
                });
            let args = VariantArgs {
                name,
                payload,
                enabled: first_variant.is_some(),
                feature_enabled: enabled,
                impression_data: impression,
            };
            let root = Variant::create(&mut fbb, Some(&args), None);
            finish(fbb, root)
        } else {
            let root = Response::create(&mut fbb, Some(enabled), impression, None);
            finish(fbb, root)
        };
        Ok(self.respond(bytes))
    }
}

impl GuestMemory for FakeModule {
    fn alloc(&mut self, len: u32) -> Result<u32> {
        let offset = self.memory.alloc(len)?;
        self.sync_stats();
        Ok(offset)
    }

    fn dealloc(&mut self, offset: u32, len: u32) -> Result<()> {
        self.memory.dealloc(offset, len)?;
        self.sync_stats();
        Ok(())
    }

    fn dealloc_response(&mut self, offset: u32, len: u32) -> Result<()> {
        self.memory.dealloc_response(offset, len)?;
        self.sync_stats();
        Ok(())
    }

    fn read(&mut self, offset: u32, len: u32) -> Result<Vec<u8>> {
        self.memory.read(offset, len)
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<()> {
        self.memory.write(offset, bytes)
    }

    fn read_c_str(&mut self, offset: u32) -> Result<Vec<u8>> {
        self.memory.read_c_str(offset)
    }
}

impl SandboxModule for FakeModule {
    fn new_engine(&mut self, now_ms: i64) -> Result<u32> {
        let engine = self.next_engine;
        self.next_engine += 1;
        self.engines.insert(
            engine,
            ToyEngine {
                window_start: now_ms,
                ..ToyEngine::default()
            },
        );
        self.stats.lock().unwrap().created.push(engine);
        Ok(engine)
    }

    fn free_engine(&mut self, engine: u32) -> Result<()> {
        self.engines.remove(&engine);
        self.stats.lock().unwrap().freed.push(engine);
        Ok(())
    }

    fn take_state(&mut self, engine: u32, offset: u32, len: u32) -> Result<u32> {
        let bytes = self.request(offset, len)?;
        let parsed = std::str::from_utf8(&bytes)
            .ok()
            .and_then(|state| serde_json::from_str::<Value>(state).ok());
        let Some(features) = parsed
            .as_ref()
            .and_then(|state| state["features"].as_array())
        else {
            return Ok(self.memory.c_string(b"state has no features list"));
        };

        let mut warnings = Vec::new();
        let mut known = BTreeMap::new();
        for feature in features {
            let Some(name) = feature["name"].as_str() else {
                continue;
            };
            if feature["enabled"].is_null() {
                warnings.push(json!({"toggle_name": name, "message": "missing enabled flag"}));
            }
            known.insert(name.to_owned(), feature.clone());
        }

        let toy = self.engine(engine)?;
        toy.features = known;
        toy.state = String::from_utf8(bytes).ok();

        if warnings.is_empty() {
            return Ok(0);
        }
        let text = Value::Array(warnings).to_string();
        Ok(self.memory.c_string(text.as_bytes()))
    }

    fn get_state(&mut self, engine: u32) -> Result<u32> {
        match self.engine(engine)?.state.clone() {
            Some(state) => Ok(self.memory.c_string(state.as_bytes())),
            None => Ok(0),
        }
    }

    fn check_enabled(&mut self, engine: u32, offset: u32, len: u32) -> Result<u64> {
        self.check(engine, offset, len, false)
    }

    fn check_variant(&mut self, engine: u32, offset: u32, len: u32) -> Result<u64> {
        self.check(engine, offset, len, true)
    }

    fn get_metrics(&mut self, engine: u32, now_ms: i64) -> Result<u64> {
        let toy = self.engine(engine)?;
        let counts = std::mem::take(&mut toy.counts);
        let start = std::mem::replace(&mut toy.window_start, now_ms);

        let toggles: Vec<_> = counts
            .iter()
            .map(|(name, count)| ToggleStatsArgs {
                name: name.as_str(),
                yes: count.yes,
                no: count.no,
                variants: count
                    .variants
                    .iter()
                    .map(|(variant, hits)| (variant.as_str(), *hits))
                    .collect(),
            })
            .collect();
        let window = (!toggles.is_empty()).then_some((start, now_ms, &toggles[..]));
        let mut fbb = FlatBufferBuilder::new();
        let root = MetricsBucket::create(&mut fbb, window);
        let bytes = finish(fbb, root);
        Ok(self.respond(bytes))
    }

    fn list_known_toggles(&mut self, engine: u32) -> Result<u64> {
        let toy = self.engine(engine)?;
        let items: Vec<_> = toy
            .features
            .iter()
            .map(|(name, feature)| {
                (
                    name.as_str(),
                    feature["type"].as_str(),
                    feature["project"].as_str().unwrap_or("default"),
                    feature["enabled"].as_bool().unwrap_or(false),
                )
            })
            .collect();
        let mut fbb = FlatBufferBuilder::new();
        let root = FeatureDefs::create(&mut fbb, &items);
        let bytes = finish(fbb, root);
        Ok(self.respond(bytes))
    }

    fn get_built_in_strategies(&mut self) -> Result<u64> {
        if self.fail_built_in_strategies {
            return Err(Error::Engine("unreachable executed".to_owned()));
        }
        let names: Vec<_> = self.built_in.iter().map(String::as_str).collect();
        let mut fbb = FlatBufferBuilder::new();
        let root = BuiltInStrategies::create(&mut fbb, &names);
        let bytes = finish(fbb, root);
        Ok(self.respond(bytes))
    }

    fn get_core_version(&mut self) -> Result<u64> {
        let mut fbb = FlatBufferBuilder::new();
        let root = CoreVersion::create(&mut fbb, &self.core_version);
        let bytes = finish(fbb, root);
        Ok(self.respond(bytes))
    }

    fn drain_log(&mut self) -> Result<Option<String>> {
        Ok(self.log.pop())
    }
}
