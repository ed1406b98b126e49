use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct ConfigSettingEntry {
    /// The key of the setting. For example, given `key=value`, this would be `key`.
    key: String,
    /// The value of the setting. For example, given `key=value`, this would be `value`.
    value: String,
}

impl FromStr for ConfigSettingEntry {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((key, value)) = s.split_once('=') else {
            return Err(anyhow::anyhow!(
                "Invalid config setting: {s} (expected `KEY=VALUE`)"
            ));
        };
        Ok(Self {
            key: key.trim().to_string(),
            value: value.trim().to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ConfigSettingValue {
    /// The value consists of a single string.
    String(String),
    /// The value consists of a list of strings.
    List(Vec<String>),
}

/// Settings to pass to a PEP 517 build backend, structured as a map from (string) key to string or
/// list of strings.
///
/// See: <https://peps.python.org/pep-0517/#config-settings>
#[derive(Debug, Default, Clone)]
pub struct ConfigSettings(BTreeMap<String, ConfigSettingValue>);

impl FromIterator<ConfigSettingEntry> for ConfigSettings {
    fn from_iter<T: IntoIterator<Item = ConfigSettingEntry>>(iter: T) -> Self {
        let mut config = BTreeMap::default();
        for entry in iter {
            match config.entry(entry.key) {
                Entry::Vacant(vacant) => {
                    vacant.insert(ConfigSettingValue::String(entry.value));
                }
                Entry::Occupied(mut occupied) => match occupied.get_mut() {
                    ConfigSettingValue::String(existing) => {
                        let existing = existing.clone();
                        occupied.insert(ConfigSettingValue::List(vec![existing, entry.value]));
                    }
                    ConfigSettingValue::List(existing) => {
                        existing.push(entry.value);
                    }
                },
            }
        }
        Self(config)
    }
}

impl ConfigSettings {
    /// Render the settings as a Python mapping literal, suitable for embedding
    /// in a generated script. Values are strings or lists, never tuples:
    /// `setuptools.build_meta` chokes on tuple values.
    pub fn as_python_literal(&self) -> String {
        serde_json::to_string(self).expect("Failed to serialize config settings")
    }
}

impl serde::Serialize for ConfigSettings {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            match value {
                ConfigSettingValue::String(value) => {
                    map.serialize_entry(&key, &value)?;
                }
                ConfigSettingValue::List(values) => {
                    map.serialize_entry(&key, &values)?;
                }
            }
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigSettingEntry, ConfigSettings};

    fn collect(entries: &[&str]) -> anyhow::Result<ConfigSettings> {
        Ok(entries
            .iter()
            .map(|entry| entry.parse::<ConfigSettingEntry>())
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .collect())
    }

    #[test]
    fn duplicate_keys_collect_into_lists() -> anyhow::Result<()> {
        let settings = collect(&[
            "key=value",
            " list = value1 ",
            "list=value2",
            "list=value3",
        ])?;
        assert_eq!(
            settings.as_python_literal(),
            r#"{"key":"value","list":["value1","value2","value3"]}"#
        );
        Ok(())
    }

    #[test]
    fn values_may_contain_the_separator() -> anyhow::Result<()> {
        let settings = collect(&["define=FOO=1"])?;
        assert_eq!(settings.as_python_literal(), r#"{"define":"FOO=1"}"#);
        Ok(())
    }

    #[test]
    fn empty_settings_render_an_empty_mapping() {
        assert_eq!(ConfigSettings::default().as_python_literal(), "{}");
    }

    #[test]
    fn missing_separator_is_rejected() {
        let err = "no-separator".parse::<ConfigSettingEntry>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid config setting: no-separator (expected `KEY=VALUE`)"
        );
    }
}
