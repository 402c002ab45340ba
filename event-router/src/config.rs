use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use common_kafka::config::KafkaConfig;
use envconfig::Envconfig;
use tracing::{info, Level};

use crate::header::DeviceTypeOverride;
use crate::pipeline::RoutingRules;
use crate::remap::EventTypeRemapper;
use crate::topics::{parse_topic_overrides, TopicResolver};
use crate::validation::{EventValidator, PassthroughValidator, SchemaValidator};

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "false")]
    pub print_sink: bool,

    #[envconfig(default = "127.0.0.1:3000")]
    pub address: SocketAddr,

    pub otel_url: Option<String>,

    #[envconfig(default = "1.0")]
    pub otel_sampling_rate: f64,

    #[envconfig(default = "event-router")]
    pub otel_service_name: String,

    // Used for integration tests
    #[envconfig(default = "true")]
    pub export_prometheus: bool,

    #[envconfig(default = "info")]
    pub log_level: Level,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(nested = true)]
    pub routing: RoutingConfig,

    pub schema_dir: Option<String>, // unset means every message and event is accepted
}

#[derive(Envconfig, Clone)]
pub struct RoutingConfig {
    #[envconfig(default = "er.event.sa")]
    pub kafka_destination_topic: String,

    #[envconfig(default = "dead.letter")]
    pub kafka_invalid_topic: String,

    pub event_type_topic_overrides: Option<String>, // "<event_type>:<topic>,<event_type>:<topic>"

    pub event_type_map_path: Option<String>,

    // Temporary firmware compatibility, set to "" to disable
    #[envconfig(default = "fm1:vam")]
    pub device_type_override: DeviceTypeOverride,
}

impl RoutingConfig {
    pub fn rules(&self) -> anyhow::Result<RoutingRules> {
        let remapper = match &self.event_type_map_path {
            Some(path) => EventTypeRemapper::from_path(path)
                .with_context(|| format!("failed to load event type map from {path}"))?,
            None => EventTypeRemapper::bundled().context("failed to load bundled event type map")?,
        };

        let overrides = self
            .event_type_topic_overrides
            .as_deref()
            .map(parse_topic_overrides)
            .unwrap_or_default();

        let topic_overrides = overrides.len();
        let topics = TopicResolver::new(
            self.kafka_destination_topic.clone(),
            self.kafka_invalid_topic.clone(),
            overrides,
        );

        info!(
            destination = topics.destination(),
            dead_letter = topics.dead_letter(),
            topic_overrides,
            event_types = remapper.len(),
            "routing configured"
        );

        Ok(RoutingRules {
            remapper,
            topics,
            device_type_override: self.device_type_override.clone(),
        })
    }
}

impl Config {
    pub fn validator(&self) -> anyhow::Result<Arc<dyn EventValidator>> {
        match &self.schema_dir {
            Some(dir) => {
                let validator = SchemaValidator::from_dir(dir)
                    .with_context(|| format!("failed to load schemas from {dir}"))?;
                Ok(Arc::new(validator))
            }
            None => Ok(Arc::new(PassthroughValidator)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(vars: &[(&str, &str)]) -> HashMap<String, String> {
        vars.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults() {
        let config = Config::init_from_hashmap(&HashMap::new()).expect("defaults are valid");
        assert!(!config.print_sink);
        assert_eq!(config.otel_service_name, "event-router");
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.routing.kafka_destination_topic, "er.event.sa");
        assert_eq!(config.routing.kafka_invalid_topic, "dead.letter");
        assert_eq!(
            config.routing.device_type_override,
            DeviceTypeOverride::new("fm1", "vam")
        );
        assert_eq!(config.kafka.kafka_hosts, "localhost:9092");

        let rules = config.routing.rules().expect("bundled rules");
        assert_eq!(rules.topics.destination(), "er.event.sa");
        assert_eq!(rules.topics.resolve("gpsPosition"), "er.event.sa");
        assert!(config.schema_dir.is_none());
        assert!(config.validator().is_ok());
    }

    #[test]
    fn routing_overrides_from_env() {
        let config = Config::init_from_hashmap(&env(&[
            ("KAFKA_DESTINATION_TOPIC", "events"),
            ("KAFKA_INVALID_TOPIC", "events.dlq"),
            ("EVENT_TYPE_TOPIC_OVERRIDES", "impact:events.impact"),
            ("DEVICE_TYPE_OVERRIDE", ""),
        ]))
        .expect("valid config");

        let rules = config.routing.rules().expect("rules");
        assert_eq!(rules.topics.resolve("impact"), "events.impact");
        assert_eq!(rules.topics.resolve("session"), "events");
        assert_eq!(rules.topics.dead_letter(), "events.dlq");
        assert_eq!(rules.device_type_override, DeviceTypeOverride::disabled());
    }

    #[test]
    fn rejects_bad_device_type_override() {
        assert!(Config::init_from_hashmap(&env(&[("DEVICE_TYPE_OVERRIDE", "fm1")])).is_err());
    }

    #[test]
    fn missing_map_file_is_an_error() {
        let config = Config::init_from_hashmap(&env(&[(
            "EVENT_TYPE_MAP_PATH",
            "/nonexistent/event_type_map.json",
        )]))
        .expect("valid config");
        assert!(config.routing.rules().is_err());
    }
}
