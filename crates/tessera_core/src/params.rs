//! Named parameters for filter and shader compilation

use rustc_hash::FxHashMap;

use crate::math::{Rgba8, Vec2};

/// Color stop of a gradient; `position` is a unitless number along the gradient
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorStop {
    pub position: f32,
    /// Premultiplied
    pub color: Rgba8,
}

/// Dynamically typed parameter value
#[derive(Clone, Debug, PartialEq)]
pub enum Variant {
    Bool(bool),
    Int(i32),
    Float(f32),
    Vec2(Vec2),
    Color(Rgba8),
    String(String),
    ColorStops(Vec<ColorStop>),
}

impl From<bool> for Variant {
    fn from(v: bool) -> Self {
        Variant::Bool(v)
    }
}

impl From<i32> for Variant {
    fn from(v: i32) -> Self {
        Variant::Int(v)
    }
}

impl From<f32> for Variant {
    fn from(v: f32) -> Self {
        Variant::Float(v)
    }
}

impl From<Vec2> for Variant {
    fn from(v: Vec2) -> Self {
        Variant::Vec2(v)
    }
}

impl From<Rgba8> for Variant {
    fn from(v: Rgba8) -> Self {
        Variant::Color(v)
    }
}

impl From<&str> for Variant {
    fn from(v: &str) -> Self {
        Variant::String(v.to_string())
    }
}

impl From<Vec<ColorStop>> for Variant {
    fn from(v: Vec<ColorStop>) -> Self {
        Variant::ColorStops(v)
    }
}

/// Parameter dictionary passed to `compile_filter` / `compile_shader`
///
/// Getters fall back to the supplied default when a key is missing or holds
/// an incompatible type. Integers and booleans convert to floats.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Parameters {
    values: FxHashMap<String, Variant>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: &str, value: impl Into<Variant>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Variant>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Variant> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn f32_or(&self, key: &str, default: f32) -> f32 {
        match self.values.get(key) {
            Some(Variant::Float(v)) => *v,
            Some(Variant::Int(v)) => *v as f32,
            Some(Variant::Bool(v)) => f32::from(u8::from(*v)),
            _ => default,
        }
    }

    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        match self.values.get(key) {
            Some(Variant::Bool(v)) => *v,
            Some(Variant::Int(v)) => *v != 0,
            Some(Variant::Float(v)) => *v != 0.0,
            _ => default,
        }
    }

    pub fn vec2_or(&self, key: &str, default: Vec2) -> Vec2 {
        match self.values.get(key) {
            Some(Variant::Vec2(v)) => *v,
            _ => default,
        }
    }

    pub fn color_or(&self, key: &str, default: Rgba8) -> Rgba8 {
        match self.values.get(key) {
            Some(Variant::Color(v)) => *v,
            _ => default,
        }
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(Variant::String(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn color_stops(&self, key: &str) -> Option<&[ColorStop]> {
        match self.values.get(key) {
            Some(Variant::ColorStops(v)) => Some(v.as_slice()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn getters_convert_and_default() {
        let params = Parameters::new()
            .with("value", 2)
            .with("repeating", true)
            .with("name", "creation");

        assert_eq!(params.f32_or("value", 1.0), 2.0);
        assert_eq!(params.f32_or("missing", 1.0), 1.0);
        assert!(params.bool_or("repeating", false));
        assert_eq!(params.str("name"), Some("creation"));
        assert_eq!(params.vec2_or("name", Vec2::ONE), Vec2::ONE);
        assert!(params.color_stops("name").is_none());
    }
}
