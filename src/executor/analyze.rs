//! Counting what an applied suite created, from `show -json` output.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::status::ResourceCounts;

/// Counts providers, managed resources, data sources and outputs in a
/// state snapshot.
///
/// Resources in child modules are included. Providers are counted once per
/// distinct `provider_name`.
///
/// # Errors
///
/// Returns an error if `json` is not valid JSON. A document without a
/// `values` section (an empty state) yields zero counts.
///
/// # Example
///
/// ```
/// use infratest::executor::count_resources;
///
/// let counts = count_resources(r#"{
///     "values": {
///         "outputs": { "id": { "value": "x" } },
///         "root_module": {
///             "resources": [
///                 { "mode": "managed", "provider_name": "registry.opentofu.org/hashicorp/random" }
///             ]
///         }
///     }
/// }"#).unwrap();
/// assert_eq!((counts.resources, counts.providers, counts.outputs), (1, 1, 1));
/// ```
pub fn count_resources(json: &str) -> Result<ResourceCounts, serde_json::Error> {
    let doc: Value = serde_json::from_str(json)?;
    let mut counts = ResourceCounts::default();
    let Some(values) = doc.get("values") else {
        return Ok(counts);
    };

    counts.outputs = values
        .get("outputs")
        .and_then(Value::as_object)
        .map_or(0, |o| o.len());

    let mut providers = BTreeSet::new();
    if let Some(root) = values.get("root_module") {
        walk_module(root, &mut counts, &mut providers);
    }
    counts.providers = providers.len();
    Ok(counts)
}

fn walk_module<'a>(module: &'a Value, counts: &mut ResourceCounts, providers: &mut BTreeSet<&'a str>) {
    for resource in module
        .get("resources")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        match resource.get("mode").and_then(Value::as_str) {
            Some("data") => counts.data_sources += 1,
            _ => counts.resources += 1,
        }
        if let Some(provider) = resource.get("provider_name").and_then(Value::as_str) {
            providers.insert(provider);
        }
    }

    for child in module
        .get("child_modules")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        walk_module(child, counts, providers);
    }
}
