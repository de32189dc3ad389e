use std::any::Any;

use serde::Serialize;

/// Anything that can flow along an edge: cloneable, shareable across tasks
/// and serializable for lifecycle events.
pub trait StepData: Any + Clone + Send + Sync + Serialize + 'static {}

impl<T> StepData for T where T: Any + Clone + Send + Sync + Serialize + 'static {}

trait AnyValue: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
    fn clone_box(&self) -> Box<dyn AnyValue>;
    fn to_json(&self) -> serde_json::Value;
    fn type_name(&self) -> &'static str;
}

impl<T: StepData> AnyValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }

    fn clone_box(&self) -> Box<dyn AnyValue> {
        Box::new(self.clone())
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::Value::String(format!("<unserializable {}: {}>", self.type_name(), e))
        })
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// A type-erased value travelling between nodes.
pub struct DynValue(Box<dyn AnyValue>);

impl DynValue {
    pub fn new<T: StepData>(value: T) -> Self {
        Self(Box::new(value))
    }

    /// Recover the concrete value. On mismatch the error is the name of the
    /// type actually held.
    pub fn downcast<T: StepData>(self) -> Result<T, &'static str> {
        let found = self.type_name();
        self.0
            .into_any()
            .downcast::<T>()
            .map(|value| *value)
            .map_err(|_| found)
    }

    pub fn downcast_ref<T: StepData>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }

    pub fn to_json(&self) -> serde_json::Value {
        self.0.to_json()
    }

    pub fn type_name(&self) -> &'static str {
        self.0.type_name()
    }
}

impl Clone for DynValue {
    fn clone(&self) -> Self {
        Self(self.0.clone_box())
    }
}

impl std::fmt::Debug for DynValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DynValue<{}>({})", self.type_name(), self.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downcast_roundtrip() {
        let value = DynValue::new(vec![1u32, 2, 3]);
        assert_eq!(value.downcast_ref::<Vec<u32>>(), Some(&vec![1, 2, 3]));
        let copy = value.clone();
        assert_eq!(copy.downcast::<Vec<u32>>().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_downcast_mismatch_names_held_type() {
        let value = DynValue::new("hello".to_string());
        assert_eq!(value.to_json(), serde_json::json!("hello"));
        let found = value.downcast::<u64>().unwrap_err();
        assert!(found.contains("String"));
    }
}
