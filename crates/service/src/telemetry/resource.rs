//! Resource attributes attached to every exported signal.

use opentelemetry::KeyValue;
use opentelemetry_sdk::Resource;
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};

/// Fixed service name; also the instrumentation scope of the meter, tracer
/// and OTLP logger.
pub const SERVICE: &str = "service-seed";

/// Build-time version, `dev` when not injected.
pub const VERSION: &str = match option_env!("SERVICE_VERSION") {
    Some(v) => v,
    None => "dev",
};

/// Build-time deployment environment, `development` when not injected.
pub const ENVIRONMENT: &str = match option_env!("DEPLOYMENT_ENVIRONMENT") {
    Some(v) => v,
    None => "development",
};

const DEPLOYMENT_ENVIRONMENT: &str = "deployment.environment";

/// The resource shared by the meter, tracer and logger providers.
pub fn service_resource() -> Resource {
    Resource::builder_empty()
        .with_attributes([
            KeyValue::new(SERVICE_NAME, SERVICE),
            KeyValue::new(SERVICE_VERSION, VERSION),
            KeyValue::new(DEPLOYMENT_ENVIRONMENT, ENVIRONMENT),
        ])
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::{Key, Value};

    #[test]
    fn carries_service_identity() {
        let resource = service_resource();
        assert_eq!(
            resource.get(&Key::from_static_str(SERVICE_NAME)),
            Some(Value::from(SERVICE))
        );
        assert!(resource.get(&Key::from_static_str(SERVICE_VERSION)).is_some());
        assert!(resource.get(&Key::from_static_str(DEPLOYMENT_ENVIRONMENT)).is_some());
    }
}
