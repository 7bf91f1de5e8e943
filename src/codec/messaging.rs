//! Flatbuffer tables exchanged with the sandboxed engine, namespace `messaging`.
//!
//! Field ids follow declaration order in the schema below. Every accessor is only sound on a
//! buffer that went through [`flatbuffers::root`], which runs the [`Verifiable`] impls here.
//!
//! ```text
//! table PropertyEntry { key: string; value: string; }
//! table ContextMessage {
//!   toggle_name: string; user_id: string; session_id: string; environment: string;
//!   app_name: string; current_time: string; remote_address: string;
//!   properties: [PropertyEntry]; custom_strategies_results: [PropertyEntry];
//! }
//! table Response { enabled: bool; has_enabled: bool; error: string; impression_data: bool; }
//! table VariantPayload { payload_type: string; value: string; }
//! table Variant {
//!   name: string; payload: VariantPayload; enabled: bool; feature_enabled: bool;
//!   error: string; impression_data: bool;
//! }
//! table VariantEntry { key: string; value: uint; }
//! table ToggleStats { yes: uint; no: uint; variants: [VariantEntry]; }
//! table ToggleEntry { key: string; value: ToggleStats; }
//! table MetricsBucket { start: long; stop: long; toggles: [ToggleEntry]; }
//! table FeatureDef { name: string; type: string; project: string; enabled: bool; }
//! table FeatureDefs { items: [FeatureDef]; }
//! table CoreVersion { version: string; }
//! table BuiltInStrategies { values: [string]; }
//! ```
use flatbuffers::{
    FlatBufferBuilder, Follow, ForwardsUOffset, InvalidFlatbuffer, Table, Verifiable, Verifier,
    VOffsetT, Vector, WIPOffset,
};

const fn field(id: VOffsetT) -> VOffsetT {
    4 + 2 * id
}

type Strings<'a> = Vector<'a, ForwardsUOffset<&'a str>>;
type Tables<'a, T> = Vector<'a, ForwardsUOffset<T>>;

macro_rules! follow_table {
    ($name:ident) => {
        #[derive(Clone, Copy)]
        pub struct $name<'a> {
            tab: Table<'a>,
        }

        impl<'a> Follow<'a> for $name<'a> {
            type Inner = $name<'a>;

            unsafe fn follow(buf: &'a [u8], loc: usize) -> Self::Inner {
                $name {
                    tab: Table::new(buf, loc),
                }
            }
        }
    };
}

follow_table!(PropertyEntry);
follow_table!(ContextMessage);
follow_table!(Response);
follow_table!(VariantPayload);
follow_table!(Variant);
follow_table!(VariantEntry);
follow_table!(ToggleStats);
follow_table!(ToggleEntry);
follow_table!(MetricsBucket);
follow_table!(FeatureDef);
follow_table!(FeatureDefs);
follow_table!(CoreVersion);
follow_table!(BuiltInStrategies);

// SAFETY for every accessor below: the table was reached through a verified root, so each
// field has the declared type.

impl<'a> PropertyEntry<'a> {
    pub const VT_KEY: VOffsetT = field(0);
    pub const VT_VALUE: VOffsetT = field(1);

    pub fn key(&self) -> Option<&'a str> {
        unsafe { self.tab.get::<ForwardsUOffset<&str>>(Self::VT_KEY, None) }
    }

    pub fn value(&self) -> Option<&'a str> {
        unsafe { self.tab.get::<ForwardsUOffset<&str>>(Self::VT_VALUE, None) }
    }

    pub fn create<'b>(
        fbb: &mut FlatBufferBuilder<'b>,
        key: &str,
        value: &str,
    ) -> WIPOffset<PropertyEntry<'b>> {
        let key = fbb.create_string(key);
        let value = fbb.create_string(value);
        let start = fbb.start_table();
        fbb.push_slot_always(Self::VT_KEY, key);
        fbb.push_slot_always(Self::VT_VALUE, value);
        WIPOffset::new(fbb.end_table(start).value())
    }
}

impl Verifiable for PropertyEntry<'_> {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<&str>>("key", Self::VT_KEY, false)?
            .visit_field::<ForwardsUOffset<&str>>("value", Self::VT_VALUE, false)?
            .finish();
        Ok(())
    }
}

/// Already-serialized fields of a [`ContextMessage`].
#[derive(Default)]
pub struct ContextMessageArgs<'b> {
    pub toggle_name: Option<WIPOffset<&'b str>>,
    pub user_id: Option<WIPOffset<&'b str>>,
    pub session_id: Option<WIPOffset<&'b str>>,
    pub environment: Option<WIPOffset<&'b str>>,
    pub app_name: Option<WIPOffset<&'b str>>,
    pub current_time: Option<WIPOffset<&'b str>>,
    pub remote_address: Option<WIPOffset<&'b str>>,
    pub properties: Option<WIPOffset<Tables<'b, PropertyEntry<'b>>>>,
    pub custom_strategies_results: Option<WIPOffset<Tables<'b, PropertyEntry<'b>>>>,
}

impl<'a> ContextMessage<'a> {
    pub const VT_TOGGLE_NAME: VOffsetT = field(0);
    pub const VT_USER_ID: VOffsetT = field(1);
    pub const VT_SESSION_ID: VOffsetT = field(2);
    pub const VT_ENVIRONMENT: VOffsetT = field(3);
    pub const VT_APP_NAME: VOffsetT = field(4);
    pub const VT_CURRENT_TIME: VOffsetT = field(5);
    pub const VT_REMOTE_ADDRESS: VOffsetT = field(6);
    pub const VT_PROPERTIES: VOffsetT = field(7);
    pub const VT_CUSTOM_STRATEGIES_RESULTS: VOffsetT = field(8);

    fn string(&self, slot: VOffsetT) -> Option<&'a str> {
        unsafe { self.tab.get::<ForwardsUOffset<&str>>(slot, None) }
    }

    pub fn toggle_name(&self) -> Option<&'a str> {
        self.string(Self::VT_TOGGLE_NAME)
    }

    pub fn user_id(&self) -> Option<&'a str> {
        self.string(Self::VT_USER_ID)
    }

    pub fn session_id(&self) -> Option<&'a str> {
        self.string(Self::VT_SESSION_ID)
    }

    pub fn environment(&self) -> Option<&'a str> {
        self.string(Self::VT_ENVIRONMENT)
    }

    pub fn app_name(&self) -> Option<&'a str> {
        self.string(Self::VT_APP_NAME)
    }

    pub fn current_time(&self) -> Option<&'a str> {
        self.string(Self::VT_CURRENT_TIME)
    }

    pub fn remote_address(&self) -> Option<&'a str> {
        self.string(Self::VT_REMOTE_ADDRESS)
    }

    pub fn properties(&self) -> Option<Tables<'a, PropertyEntry<'a>>> {
        unsafe {
            self.tab
                .get::<ForwardsUOffset<Tables<PropertyEntry>>>(Self::VT_PROPERTIES, None)
        }
    }

    pub fn custom_strategies_results(&self) -> Option<Tables<'a, PropertyEntry<'a>>> {
        unsafe {
            self.tab.get::<ForwardsUOffset<Tables<PropertyEntry>>>(
                Self::VT_CUSTOM_STRATEGIES_RESULTS,
                None,
            )
        }
    }

    pub fn create<'b>(
        fbb: &mut FlatBufferBuilder<'b>,
        args: &ContextMessageArgs<'b>,
    ) -> WIPOffset<ContextMessage<'b>> {
        let start = fbb.start_table();
        let strings = [
            (Self::VT_TOGGLE_NAME, args.toggle_name),
            (Self::VT_USER_ID, args.user_id),
            (Self::VT_SESSION_ID, args.session_id),
            (Self::VT_ENVIRONMENT, args.environment),
            (Self::VT_APP_NAME, args.app_name),
            (Self::VT_CURRENT_TIME, args.current_time),
            (Self::VT_REMOTE_ADDRESS, args.remote_address),
        ];
        for (slot, value) in strings {
            if let Some(value) = value {
                fbb.push_slot_always(slot, value);
            }
        }
        if let Some(properties) = args.properties {
            fbb.push_slot_always(Self::VT_PROPERTIES, properties);
        }
        if let Some(results) = args.custom_strategies_results {
            fbb.push_slot_always(Self::VT_CUSTOM_STRATEGIES_RESULTS, results);
        }
        WIPOffset::new(fbb.end_table(start).value())
    }
}

impl Verifiable for ContextMessage<'_> {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<&str>>("toggle_name", Self::VT_TOGGLE_NAME, false)?
            .visit_field::<ForwardsUOffset<&str>>("user_id", Self::VT_USER_ID, false)?
            .visit_field::<ForwardsUOffset<&str>>("session_id", Self::VT_SESSION_ID, false)?
            .visit_field::<ForwardsUOffset<&str>>("environment", Self::VT_ENVIRONMENT, false)?
            .visit_field::<ForwardsUOffset<&str>>("app_name", Self::VT_APP_NAME, false)?
            .visit_field::<ForwardsUOffset<&str>>("current_time", Self::VT_CURRENT_TIME, false)?
            .visit_field::<ForwardsUOffset<&str>>(
                "remote_address",
                Self::VT_REMOTE_ADDRESS,
                false,
            )?
            .visit_field::<ForwardsUOffset<Tables<PropertyEntry>>>(
                "properties",
                Self::VT_PROPERTIES,
                false,
            )?
            .visit_field::<ForwardsUOffset<Tables<PropertyEntry>>>(
                "custom_strategies_results",
                Self::VT_CUSTOM_STRATEGIES_RESULTS,
                false,
            )?
            .finish();
        Ok(())
    }
}

impl<'a> Response<'a> {
    pub const VT_ENABLED: VOffsetT = field(0);
    pub const VT_HAS_ENABLED: VOffsetT = field(1);
    pub const VT_ERROR: VOffsetT = field(2);
    pub const VT_IMPRESSION_DATA: VOffsetT = field(3);

    pub fn enabled(&self) -> bool {
        unsafe { self.tab.get::<bool>(Self::VT_ENABLED, Some(false)) }.unwrap_or(false)
    }

    pub fn has_enabled(&self) -> bool {
        unsafe { self.tab.get::<bool>(Self::VT_HAS_ENABLED, Some(false)) }.unwrap_or(false)
    }

    pub fn error(&self) -> Option<&'a str> {
        unsafe { self.tab.get::<ForwardsUOffset<&str>>(Self::VT_ERROR, None) }
    }

    pub fn impression_data(&self) -> bool {
        unsafe { self.tab.get::<bool>(Self::VT_IMPRESSION_DATA, Some(false)) }.unwrap_or(false)
    }

    /// `enabled` is `None` for an unknown toggle.
    pub fn create<'b>(
        fbb: &mut FlatBufferBuilder<'b>,
        enabled: Option<bool>,
        impression_data: bool,
        error: Option<&str>,
    ) -> WIPOffset<Response<'b>> {
        let error = error.map(|error| fbb.create_string(error));
        let start = fbb.start_table();
        if let Some(error) = error {
            fbb.push_slot_always(Self::VT_ERROR, error);
        }
        fbb.push_slot(Self::VT_ENABLED, enabled.unwrap_or(false), false);
        fbb.push_slot(Self::VT_HAS_ENABLED, enabled.is_some(), false);
        fbb.push_slot(Self::VT_IMPRESSION_DATA, impression_data, false);
        WIPOffset::new(fbb.end_table(start).value())
    }
}

impl Verifiable for Response<'_> {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<bool>("enabled", Self::VT_ENABLED, false)?
            .visit_field::<bool>("has_enabled", Self::VT_HAS_ENABLED, false)?
            .visit_field::<ForwardsUOffset<&str>>("error", Self::VT_ERROR, false)?
            .visit_field::<bool>("impression_data", Self::VT_IMPRESSION_DATA, false)?
            .finish();
        Ok(())
    }
}

impl<'a> VariantPayload<'a> {
    pub const VT_PAYLOAD_TYPE: VOffsetT = field(0);
    pub const VT_VALUE: VOffsetT = field(1);

    pub fn payload_type(&self) -> Option<&'a str> {
        unsafe { self.tab.get::<ForwardsUOffset<&str>>(Self::VT_PAYLOAD_TYPE, None) }
    }

    pub fn value(&self) -> Option<&'a str> {
        unsafe { self.tab.get::<ForwardsUOffset<&str>>(Self::VT_VALUE, None) }
    }
}

impl Verifiable for VariantPayload<'_> {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<&str>>("payload_type", Self::VT_PAYLOAD_TYPE, false)?
            .visit_field::<ForwardsUOffset<&str>>("value", Self::VT_VALUE, false)?
            .finish();
        Ok(())
    }
}

/// Plain fields of a resolved [`Variant`].
pub struct VariantArgs<'s> {
    pub name: &'s str,
    pub payload: Option<(&'s str, &'s str)>,
    pub enabled: bool,
    pub feature_enabled: bool,
    pub impression_data: bool,
}

impl<'a> Variant<'a> {
    pub const VT_NAME: VOffsetT = field(0);
    pub const VT_PAYLOAD: VOffsetT = field(1);
    pub const VT_ENABLED: VOffsetT = field(2);
    pub const VT_FEATURE_ENABLED: VOffsetT = field(3);
    pub const VT_ERROR: VOffsetT = field(4);
    pub const VT_IMPRESSION_DATA: VOffsetT = field(5);

    pub fn name(&self) -> Option<&'a str> {
        unsafe { self.tab.get::<ForwardsUOffset<&str>>(Self::VT_NAME, None) }
    }

    pub fn payload(&self) -> Option<VariantPayload<'a>> {
        unsafe {
            self.tab
                .get::<ForwardsUOffset<VariantPayload>>(Self::VT_PAYLOAD, None)
        }
    }

    pub fn enabled(&self) -> bool {
        unsafe { self.tab.get::<bool>(Self::VT_ENABLED, Some(false)) }.unwrap_or(false)
    }

    pub fn feature_enabled(&self) -> bool {
        unsafe { self.tab.get::<bool>(Self::VT_FEATURE_ENABLED, Some(false)) }.unwrap_or(false)
    }

    pub fn error(&self) -> Option<&'a str> {
        unsafe { self.tab.get::<ForwardsUOffset<&str>>(Self::VT_ERROR, None) }
    }

    pub fn impression_data(&self) -> bool {
        unsafe { self.tab.get::<bool>(Self::VT_IMPRESSION_DATA, Some(false)) }.unwrap_or(false)
    }

    /// `variant` is `None` for an unknown toggle.
    pub fn create<'b>(
        fbb: &mut FlatBufferBuilder<'b>,
        variant: Option<&VariantArgs<'_>>,
        error: Option<&str>,
    ) -> WIPOffset<Variant<'b>> {
        let error = error.map(|error| fbb.create_string(error));
        let fields = variant.map(|variant| {
            let payload = variant.payload.map(|(payload_type, value)| {
                let payload_type = fbb.create_string(payload_type);
                let value = fbb.create_string(value);
                let start = fbb.start_table();
                fbb.push_slot_always(VariantPayload::VT_PAYLOAD_TYPE, payload_type);
                fbb.push_slot_always(VariantPayload::VT_VALUE, value);
                WIPOffset::<VariantPayload>::new(fbb.end_table(start).value())
            });
            (fbb.create_string(variant.name), payload, variant)
        });

        let start = fbb.start_table();
        if let Some(error) = error {
            fbb.push_slot_always(Self::VT_ERROR, error);
        }
        if let Some((name, payload, variant)) = fields {
            fbb.push_slot_always(Self::VT_NAME, name);
            if let Some(payload) = payload {
                fbb.push_slot_always(Self::VT_PAYLOAD, payload);
            }
            fbb.push_slot(Self::VT_ENABLED, variant.enabled, false);
            fbb.push_slot(Self::VT_FEATURE_ENABLED, variant.feature_enabled, false);
            fbb.push_slot(Self::VT_IMPRESSION_DATA, variant.impression_data, false);
        }
        WIPOffset::new(fbb.end_table(start).value())
    }
}

impl Verifiable for Variant<'_> {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<&str>>("name", Self::VT_NAME, false)?
            .visit_field::<ForwardsUOffset<VariantPayload>>("payload", Self::VT_PAYLOAD, false)?
            .visit_field::<bool>("enabled", Self::VT_ENABLED, false)?
            .visit_field::<bool>("feature_enabled", Self::VT_FEATURE_ENABLED, false)?
            .visit_field::<ForwardsUOffset<&str>>("error", Self::VT_ERROR, false)?
            .visit_field::<bool>("impression_data", Self::VT_IMPRESSION_DATA, false)?
            .finish();
        Ok(())
    }
}

impl<'a> VariantEntry<'a> {
    pub const VT_KEY: VOffsetT = field(0);
    pub const VT_VALUE: VOffsetT = field(1);

    pub fn key(&self) -> Option<&'a str> {
        unsafe { self.tab.get::<ForwardsUOffset<&str>>(Self::VT_KEY, None) }
    }

    pub fn value(&self) -> u32 {
        unsafe { self.tab.get::<u32>(Self::VT_VALUE, Some(0)) }.unwrap_or(0)
    }
}

impl Verifiable for VariantEntry<'_> {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<&str>>("key", Self::VT_KEY, false)?
            .visit_field::<u32>("value", Self::VT_VALUE, false)?
            .finish();
        Ok(())
    }
}

impl<'a> ToggleStats<'a> {
    pub const VT_YES: VOffsetT = field(0);
    pub const VT_NO: VOffsetT = field(1);
    pub const VT_VARIANTS: VOffsetT = field(2);

    pub fn yes(&self) -> u32 {
        unsafe { self.tab.get::<u32>(Self::VT_YES, Some(0)) }.unwrap_or(0)
    }

    pub fn no(&self) -> u32 {
        unsafe { self.tab.get::<u32>(Self::VT_NO, Some(0)) }.unwrap_or(0)
    }

    pub fn variants(&self) -> Option<Tables<'a, VariantEntry<'a>>> {
        unsafe {
            self.tab
                .get::<ForwardsUOffset<Tables<VariantEntry>>>(Self::VT_VARIANTS, None)
        }
    }
}

impl Verifiable for ToggleStats<'_> {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<u32>("yes", Self::VT_YES, false)?
            .visit_field::<u32>("no", Self::VT_NO, false)?
            .visit_field::<ForwardsUOffset<Tables<VariantEntry>>>(
                "variants",
                Self::VT_VARIANTS,
                false,
            )?
            .finish();
        Ok(())
    }
}

impl<'a> ToggleEntry<'a> {
    pub const VT_KEY: VOffsetT = field(0);
    pub const VT_VALUE: VOffsetT = field(1);

    pub fn key(&self) -> Option<&'a str> {
        unsafe { self.tab.get::<ForwardsUOffset<&str>>(Self::VT_KEY, None) }
    }

    pub fn value(&self) -> Option<ToggleStats<'a>> {
        unsafe { self.tab.get::<ForwardsUOffset<ToggleStats>>(Self::VT_VALUE, None) }
    }
}

impl Verifiable for ToggleEntry<'_> {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<&str>>("key", Self::VT_KEY, false)?
            .visit_field::<ForwardsUOffset<ToggleStats>>("value", Self::VT_VALUE, false)?
            .finish();
        Ok(())
    }
}

/// Counters of one toggle in a [`MetricsBucket`] under construction.
pub struct ToggleStatsArgs<'s> {
    pub name: &'s str,
    pub yes: u32,
    pub no: u32,
    pub variants: Vec<(&'s str, u32)>,
}

impl<'a> MetricsBucket<'a> {
    pub const VT_START: VOffsetT = field(0);
    pub const VT_STOP: VOffsetT = field(1);
    pub const VT_TOGGLES: VOffsetT = field(2);

    pub fn start(&self) -> i64 {
        unsafe { self.tab.get::<i64>(Self::VT_START, Some(0)) }.unwrap_or(0)
    }

    pub fn stop(&self) -> i64 {
        unsafe { self.tab.get::<i64>(Self::VT_STOP, Some(0)) }.unwrap_or(0)
    }

    pub fn toggles(&self) -> Option<Tables<'a, ToggleEntry<'a>>> {
        unsafe {
            self.tab
                .get::<ForwardsUOffset<Tables<ToggleEntry>>>(Self::VT_TOGGLES, None)
        }
    }

    /// `window` is `None` when nothing was counted; the table is then left empty.
    pub fn create<'b>(
        fbb: &mut FlatBufferBuilder<'b>,
        window: Option<(i64, i64, &[ToggleStatsArgs<'_>])>,
    ) -> WIPOffset<MetricsBucket<'b>> {
        let Some((start_ms, stop_ms, toggles)) = window else {
            let start = fbb.start_table();
            return WIPOffset::new(fbb.end_table(start).value());
        };

        let entries: Vec<_> = toggles
            .iter()
            .map(|toggle| {
                let variants: Vec<_> = toggle
                    .variants
                    .iter()
                    .map(|(name, count)| {
                        let key = fbb.create_string(name);
                        let start = fbb.start_table();
                        fbb.push_slot_always(VariantEntry::VT_KEY, key);
                        fbb.push_slot(VariantEntry::VT_VALUE, *count, 0);
                        WIPOffset::<VariantEntry>::new(fbb.end_table(start).value())
                    })
                    .collect();
                let variants = fbb.create_vector(&variants);

                let start = fbb.start_table();
                fbb.push_slot(ToggleStats::VT_YES, toggle.yes, 0);
                fbb.push_slot(ToggleStats::VT_NO, toggle.no, 0);
                fbb.push_slot_always(ToggleStats::VT_VARIANTS, variants);
                let stats = WIPOffset::<ToggleStats>::new(fbb.end_table(start).value());

                let key = fbb.create_string(toggle.name);
                let start = fbb.start_table();
                fbb.push_slot_always(ToggleEntry::VT_KEY, key);
                fbb.push_slot_always(ToggleEntry::VT_VALUE, stats);
                WIPOffset::<ToggleEntry>::new(fbb.end_table(start).value())
            })
            .collect();
        let entries = fbb.create_vector(&entries);

        let start = fbb.start_table();
        fbb.push_slot(Self::VT_START, start_ms, 0);
        fbb.push_slot(Self::VT_STOP, stop_ms, 0);
        fbb.push_slot_always(Self::VT_TOGGLES, entries);
        WIPOffset::new(fbb.end_table(start).value())
    }
}

impl Verifiable for MetricsBucket<'_> {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<i64>("start", Self::VT_START, false)?
            .visit_field::<i64>("stop", Self::VT_STOP, false)?
            .visit_field::<ForwardsUOffset<Tables<ToggleEntry>>>(
                "toggles",
                Self::VT_TOGGLES,
                false,
            )?
            .finish();
        Ok(())
    }
}

impl<'a> FeatureDef<'a> {
    pub const VT_NAME: VOffsetT = field(0);
    pub const VT_TYPE_: VOffsetT = field(1);
    pub const VT_PROJECT: VOffsetT = field(2);
    pub const VT_ENABLED: VOffsetT = field(3);

    pub fn name(&self) -> Option<&'a str> {
        unsafe { self.tab.get::<ForwardsUOffset<&str>>(Self::VT_NAME, None) }
    }

    pub fn type_(&self) -> Option<&'a str> {
        unsafe { self.tab.get::<ForwardsUOffset<&str>>(Self::VT_TYPE_, None) }
    }

    pub fn project(&self) -> Option<&'a str> {
        unsafe { self.tab.get::<ForwardsUOffset<&str>>(Self::VT_PROJECT, None) }
    }

    pub fn enabled(&self) -> bool {
        unsafe { self.tab.get::<bool>(Self::VT_ENABLED, Some(false)) }.unwrap_or(false)
    }
}

impl Verifiable for FeatureDef<'_> {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<&str>>("name", Self::VT_NAME, false)?
            .visit_field::<ForwardsUOffset<&str>>("type", Self::VT_TYPE_, false)?
            .visit_field::<ForwardsUOffset<&str>>("project", Self::VT_PROJECT, false)?
            .visit_field::<bool>("enabled", Self::VT_ENABLED, false)?
            .finish();
        Ok(())
    }
}

impl<'a> FeatureDefs<'a> {
    pub const VT_ITEMS: VOffsetT = field(0);

    pub fn items(&self) -> Option<Tables<'a, FeatureDef<'a>>> {
        unsafe {
            self.tab
                .get::<ForwardsUOffset<Tables<FeatureDef>>>(Self::VT_ITEMS, None)
        }
    }

    /// Each item is `(name, type, project, enabled)`.
    pub fn create<'b>(
        fbb: &mut FlatBufferBuilder<'b>,
        items: &[(&str, Option<&str>, &str, bool)],
    ) -> WIPOffset<FeatureDefs<'b>> {
        let items: Vec<_> = items
            .iter()
            .map(|(name, feature_type, project, enabled)| {
                let name = fbb.create_string(name);
                let feature_type = feature_type.map(|feature_type| fbb.create_string(feature_type));
                let project = fbb.create_string(project);
                let start = fbb.start_table();
                fbb.push_slot_always(FeatureDef::VT_NAME, name);
                if let Some(feature_type) = feature_type {
                    fbb.push_slot_always(FeatureDef::VT_TYPE_, feature_type);
                }
                fbb.push_slot_always(FeatureDef::VT_PROJECT, project);
                fbb.push_slot(FeatureDef::VT_ENABLED, *enabled, false);
                WIPOffset::<FeatureDef>::new(fbb.end_table(start).value())
            })
            .collect();
        let items = fbb.create_vector(&items);

        let start = fbb.start_table();
        fbb.push_slot_always(Self::VT_ITEMS, items);
        WIPOffset::new(fbb.end_table(start).value())
    }
}

impl Verifiable for FeatureDefs<'_> {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<Tables<FeatureDef>>>("items", Self::VT_ITEMS, false)?
            .finish();
        Ok(())
    }
}

impl<'a> CoreVersion<'a> {
    pub const VT_VERSION: VOffsetT = field(0);

    pub fn version(&self) -> Option<&'a str> {
        unsafe { self.tab.get::<ForwardsUOffset<&str>>(Self::VT_VERSION, None) }
    }

    pub fn create<'b>(fbb: &mut FlatBufferBuilder<'b>, version: &str) -> WIPOffset<CoreVersion<'b>> {
        let version = fbb.create_string(version);
        let start = fbb.start_table();
        fbb.push_slot_always(Self::VT_VERSION, version);
        WIPOffset::new(fbb.end_table(start).value())
    }
}

impl Verifiable for CoreVersion<'_> {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<&str>>("version", Self::VT_VERSION, false)?
            .finish();
        Ok(())
    }
}

impl<'a> BuiltInStrategies<'a> {
    pub const VT_VALUES: VOffsetT = field(0);

    pub fn values(&self) -> Option<Strings<'a>> {
        unsafe { self.tab.get::<ForwardsUOffset<Strings>>(Self::VT_VALUES, None) }
    }

    pub fn create<'b>(
        fbb: &mut FlatBufferBuilder<'b>,
        values: &[&str],
    ) -> WIPOffset<BuiltInStrategies<'b>> {
        let values: Vec<_> = values.iter().map(|value| fbb.create_string(value)).collect();
        let values = fbb.create_vector(&values);
        let start = fbb.start_table();
        fbb.push_slot_always(Self::VT_VALUES, values);
        WIPOffset::new(fbb.end_table(start).value())
    }
}

impl Verifiable for BuiltInStrategies<'_> {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<Strings>>("values", Self::VT_VALUES, false)?
            .finish();
        Ok(())
    }
}

/// Finish `fbb` with `root` and copy the finished buffer out.
pub fn finish<T>(mut fbb: FlatBufferBuilder<'_>, root: WIPOffset<T>) -> Vec<u8> {
    fbb.finish(root, None);
    fbb.finished_data().to_vec()
}
