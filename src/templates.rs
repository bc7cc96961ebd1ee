//! Render contract for declarative targets
//!
//! A template turns the managed resource and the shared data of a pass into
//! the full description of one target object. How the text or value is
//! produced is up to the implementation; closures returning a JSON value
//! and [`YamlTemplate`] are supported out of the box.

use kube::api::DynamicObject;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::SharedData;
use crate::error::{Error, Result};

/// Inputs available while rendering
#[derive(Clone, Copy, Debug)]
pub struct RenderInput<'a> {
    /// The managed resource serialized to JSON
    pub object: &'a Value,
    /// Values published by earlier steps
    pub data: &'a SharedData,
}

impl<'a> RenderInput<'a> {
    pub fn name(&self) -> &'a str {
        self.object["metadata"]["name"].as_str().unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<&'a str> {
        self.object["metadata"]["namespace"].as_str()
    }

    /// A field of the resource spec, `Null` when absent
    pub fn spec(&self, field: &str) -> &'a Value {
        &self.object["spec"][field]
    }

    /// Deserialize the whole resource into a typed view
    pub fn object_as<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(self.object).map_err(|e| Error::render(format!("unexpected object shape: {}", e)))
    }
}

/// Produces a target description.
///
/// Templates are also rendered once against a bare placeholder resource at
/// setup time to learn the target kind, so they must tolerate a missing spec.
pub trait Template: Send + Sync {
    fn render(&self, input: &RenderInput<'_>) -> Result<Value>;
}

impl<F> Template for F
where
    F: Fn(&RenderInput<'_>) -> Result<Value> + Send + Sync,
{
    fn render(&self, input: &RenderInput<'_>) -> Result<Value> {
        self(input)
    }
}

/// Template producing YAML text
pub struct YamlTemplate<F>(pub F);

impl<F> Template for YamlTemplate<F>
where
    F: Fn(&RenderInput<'_>) -> Result<String> + Send + Sync,
{
    fn render(&self, input: &RenderInput<'_>) -> Result<Value> {
        parse_yaml(&(self.0)(input)?)
    }
}

/// Parse one rendered YAML document into a JSON value
pub fn parse_yaml(text: &str) -> Result<Value> {
    let value: Value = serde_yaml::from_str(text)?;
    if !value.is_object() {
        return Err(Error::render("rendered template is not a mapping"));
    }
    Ok(value)
}

/// Convert a rendered value into a typed-meta dynamic object
pub fn to_object(value: Value) -> Result<DynamicObject> {
    let obj: DynamicObject = serde_json::from_value(value)
        .map_err(|e| Error::render(format!("rendered template is not an object: {}", e)))?;
    if obj.types.is_none() {
        return Err(Error::render("rendered template has no apiVersion/kind"));
    }
    if obj.metadata.name.as_deref().unwrap_or_default().is_empty() {
        return Err(Error::render("rendered template has no metadata.name"));
    }
    Ok(obj)
}
