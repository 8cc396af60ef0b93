use serde::de::Error;
use serde::{Deserialize, Deserializer};

/// Deserializes a string that must contain something besides whitespace.
///
/// Used with `#[serde(deserialize_with = "...")]` on required settings.
pub fn non_empty<'de, D>(des: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(des)?;
    if s.trim().is_empty() {
        return Err(D::Error::custom("value must not be empty"));
    }
    Ok(s)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde::Deserialize;

    use crate::config::Config;

    #[derive(Debug, Deserialize)]
    struct Named {
        #[serde(deserialize_with = "super::non_empty")]
        name: String,
    }

    #[rstest]
    #[case("name = \"keel\"", Some("keel"))]
    #[case("name = \"  keel \"", Some("  keel "))]
    #[case("name = \"\"", None)]
    #[case("name = \"   \"", None)]
    fn rejects_blank_strings(#[case] toml: &str, #[case] expected: Option<&str>) {
        let config = Config::from_toml(toml).unwrap();
        let named = config.inner().clone().try_deserialize::<Named>();
        match expected {
            Some(name) => assert_eq!(named.unwrap().name, name),
            None => assert!(named.is_err()),
        }
    }
}
