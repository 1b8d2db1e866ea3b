//! Types for use when configuring replay cache modules.

use crate::*;

/// helper transcode function
fn tc<S: serde::Serialize, D: serde::de::DeserializeOwned>(
    s: &S,
) -> ReplayResult<D> {
    serde_json::from_str(
        &serde_json::to_string(s)
            .map_err(|e| ReplayError::other_src("encode", e))?,
    )
    .map_err(|e| ReplayError::other_src("decode", e))
}

/// Denotes a type used to configure a specific module.
///
/// Module configs are read once, when the owning client is created.
/// Nothing here can be changed for a client that already exists.
pub trait ModConfig:
    'static
    + Sized
    + Default
    + std::fmt::Debug
    + serde::Serialize
    + serde::de::DeserializeOwned
    + Send
    + Sync
{
    /// The key this module's config lives under.
    const MODULE_NAME: &'static str;
}

/// Replay cache configuration.
///
/// A JSON object with one entry per module.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Config(serde_json::Map<String, serde_json::Value>);

impl Config {
    /// Add the default configuration of a module, for generating an
    /// example configuration file.
    pub fn add_default_module_config<M: ModConfig>(
        &mut self,
    ) -> ReplayResult<()> {
        if self.0.contains_key(M::MODULE_NAME) {
            return Err(ReplayError::other(format!(
                "Refusing to overwrite conflicting module name: {}",
                M::MODULE_NAME
            )));
        }
        self.0.insert(M::MODULE_NAME.to_string(), tc(&M::default())?);
        Ok(())
    }

    /// Replace the configuration of a module.
    pub fn set_module_config<M: ModConfig>(
        &mut self,
        m: &M,
    ) -> ReplayResult<()> {
        self.0.insert(M::MODULE_NAME.to_string(), tc(m)?);
        Ok(())
    }

    /// Extract the configuration of a module. This config may have been
    /// loaded from disk and edited by humans, so modules should set sane
    /// defaults for missing properties. An absent module gets its default.
    pub fn get_module_config<M: ModConfig>(&self) -> ReplayResult<M> {
        self.0
            .get(M::MODULE_NAME)
            .map(tc)
            .unwrap_or_else(|| Ok(M::default()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Debug, Default, serde::Serialize, serde::Deserialize, PartialEq)]
    #[serde(default, rename_all = "camelCase")]
    struct Mod1 {
        p_a: u32,
        p_b: String,
    }

    impl ModConfig for Mod1 {
        const MODULE_NAME: &'static str = "mod1";
    }

    #[test]
    fn config_usage_example() {
        let mut config = Config::default();
        config.add_default_module_config::<Mod1>().unwrap();
        assert!(config.add_default_module_config::<Mod1>().is_err());

        assert_eq!(
            r#"{
  "mod1": {
    "pA": 0,
    "pB": ""
  }
}"#,
            serde_json::to_string_pretty(&config).unwrap()
        );

        // ensure we can load a weird config from disk
        let config: Config = serde_json::from_str(
            r#"{
          "modBAD": { "foo": "bar" },
          "mod1": { "pB": "test-p_b", "extra": "foo" }
        }"#,
        )
        .unwrap();

        assert_eq!(
            Mod1 {
                p_a: 0,
                p_b: "test-p_b".to_string(),
            },
            config.get_module_config::<Mod1>().unwrap(),
        );
    }

    #[test]
    fn unset_module_gets_default() {
        let config = Config::default();
        assert_eq!(Mod1::default(), config.get_module_config().unwrap());
    }

    #[test]
    fn set_module_config_overwrites() {
        let mut config = Config::default();
        config.add_default_module_config::<Mod1>().unwrap();
        config
            .set_module_config(&Mod1 {
                p_a: 7,
                p_b: "x".into(),
            })
            .unwrap();
        assert_eq!(7, config.get_module_config::<Mod1>().unwrap().p_a);
    }
}
