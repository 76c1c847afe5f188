//! Codec for the `_product.requires` property.
//!
//! Entries are `namespace|name|range|optional|filter`, joined by `;`. The
//! filter is last so it may itself contain `|`.

use tracing::debug;

/// One requirement of a product unit as carried in its properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRequirement {
    pub namespace: String,
    pub name: String,
    /// Version range text; `0.0.0` means any version.
    pub range: String,
    pub optional: bool,
    /// Extra LDAP fragment ANDed into the generated filter.
    pub filter: Option<String>,
}

impl ProductRequirement {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        range: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            range: range.into(),
            optional: false,
            filter: None,
        }
    }
}

pub fn encode_product_requirements(requirements: &[ProductRequirement]) -> String {
    requirements
        .iter()
        .map(|r| {
            format!(
                "{}|{}|{}|{}|{}",
                r.namespace,
                r.name,
                r.range,
                r.optional,
                r.filter.as_deref().unwrap_or("")
            )
        })
        .collect::<Vec<_>>()
        .join(";")
}

/// Decode an encoded list. Entries with fewer than five fields are skipped.
pub fn decode_product_requirements(encoded: &str) -> Vec<ProductRequirement> {
    encoded
        .split(';')
        .filter(|entry| !entry.trim().is_empty())
        .filter_map(|entry| {
            let parts: Vec<&str> = entry.splitn(5, '|').collect();
            let [namespace, name, range, optional, filter] = parts.as_slice() else {
                debug!(entry, "skipping malformed product requirement");
                return None;
            };
            Some(ProductRequirement {
                namespace: namespace.trim().to_string(),
                name: name.trim().to_string(),
                range: range.trim().to_string(),
                optional: optional.trim().eq_ignore_ascii_case("true"),
                filter: Some(filter.trim())
                    .filter(|f| !f.is_empty())
                    .map(str::to_string),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode() {
        let mut ee = ProductRequirement::new("osgi.ee", "JavaSE", "0.0.0");
        ee.filter = Some("(|(version=17)(version=21))".into());
        let mut optional = ProductRequirement::new(
            "org.eclipse.equinox.p2.iu",
            "org.example.extras.feature.group",
            "[1.0.0,2.0.0)",
        );
        optional.optional = true;
        let list = vec![ee, optional];

        let encoded = encode_product_requirements(&list);
        assert_eq!(
            encoded,
            "osgi.ee|JavaSE|0.0.0|false|(|(version=17)(version=21));\
             org.eclipse.equinox.p2.iu|org.example.extras.feature.group|[1.0.0,2.0.0)|true|"
        );
        assert_eq!(decode_product_requirements(&encoded), list);
    }

    #[test]
    fn decode_skips_short_entries() {
        let decoded = decode_product_requirements("a|b|c;;osgi.ee|JavaSE|0.0.0|false|");
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].name, "JavaSE");
        assert!(decoded[0].filter.is_none());
        assert!(decode_product_requirements("").is_empty());
    }
}
