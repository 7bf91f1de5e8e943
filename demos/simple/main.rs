use yggdrasil_bridge::{strategy_fn, Context, EngineConfig, NativeTransport};

const STATE: &str = r##"{
  "version": 2,
  "features": [
    {"name": "new-checkout", "enabled": true, "strategies": [
      {"name": "tenant", "parameters": {"tenants": "acme,globex"}}
    ]},
    {"name": "banner-color", "enabled": true, "strategies": [{"name": "default"}],
     "variants": [{"name": "blue", "weight": 1000, "payload": {"type": "string", "value": "#00f"}}]}
  ]
}"##;

pub fn main() -> yggdrasil_bridge::Result<()> {
    env_logger::init();

    // Looks for the native library in the directory named by YGGDRASIL_LIB_PATH.
    let transport = NativeTransport::from_env()?;

    let mut config = EngineConfig::new();
    config.custom_strategy(strategy_fn("tenant", |parameters, context| {
        parameters
            .get("tenants")
            .zip(context.properties.get("tenant"))
            .is_some_and(|(tenants, tenant)| tenants.split(',').any(|t| t == tenant))
    }));
    let engine = config.to_engine(transport)?;

    println!("Engine core: {}", engine.core_version()?);
    for warning in engine.take_state(STATE)? {
        println!("State warning for {}: {}", warning.toggle_name, warning.message);
    }

    let context = Context::new()
        .with_user_id("7")
        .with_property("tenant", "acme");
    let enabled = engine
        .is_enabled("new-checkout", &context)?
        // default when the toggle is unknown
        .unwrap_or(false);
    println!("new-checkout: {enabled}");

    if let Some(variant) = engine.get_variant("banner-color", &context)? {
        println!("banner-color: {} {:?}", variant.name, variant.payload);
    }

    if let Some(metrics) = engine.get_metrics()? {
        for (toggle, count) in &metrics.toggles {
            println!("{toggle}: {} yes, {} no", count.yes, count.no);
        }
    }

    engine.release();
    Ok(())
}
