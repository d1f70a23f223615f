use anyhow::{Context, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

/// A JSON object from which [TypedParameters](TypedParameter) are parsed: request objects,
/// client metadata and authorization responses.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct UntypedObject(pub(crate) Map<String, Json>);

/// A strongly typed member of an [UntypedObject].
pub trait TypedParameter:
    TryFrom<Json, Error = anyhow::Error> + TryInto<Json> + Clone + std::fmt::Debug
{
    const KEY: &'static str;
}

impl UntypedObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a [TypedParameter] from the Object.
    ///
    /// Note that this method clones the underlying data.
    pub fn get<T: TypedParameter>(&self) -> Option<Result<T>> {
        Some(self.0.get(T::KEY)?.clone().try_into())
    }

    /// Like [UntypedObject::get], failing when the member is absent.
    pub fn require<T: TypedParameter>(&self) -> Result<T> {
        self.get().parsing_error()
    }

    /// Insert a [TypedParameter], replacing any existing member with the same key.
    pub fn insert<T: TypedParameter>(&mut self, t: T) -> Result<()> {
        let value = t
            .try_into()
            .map_err(|_| Error::msg(format!("'{}' could not be serialized", T::KEY)))?;
        self.0.insert(T::KEY.to_owned(), value);
        Ok(())
    }

    pub fn as_map(&self) -> &Map<String, Json> {
        &self.0
    }
}

impl From<Map<String, Json>> for UntypedObject {
    fn from(value: Map<String, Json>) -> Self {
        Self(value)
    }
}

impl From<UntypedObject> for Json {
    fn from(value: UntypedObject) -> Self {
        value.0.into()
    }
}

pub trait ParsingErrorContext {
    type T: TypedParameter;

    fn parsing_error(self) -> Result<Self::T>;
}

impl<T: TypedParameter> ParsingErrorContext for Option<Result<T>> {
    type T = T;

    fn parsing_error(self) -> Result<T> {
        self.context(format!("'{}' is missing", T::KEY))?
            .context(format!("'{}' could not be parsed", T::KEY))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::authorization_request::parameters::Nonce;
    use serde_json::json;

    #[test]
    fn typed_members_are_parsed_on_access() {
        let object: UntypedObject = serde_json::from_value(json!({ "nonce": "n-0S6" })).unwrap();
        assert_eq!(object.require::<Nonce>().unwrap().0, "n-0S6");

        let object: UntypedObject = serde_json::from_value(json!({ "nonce": 7 })).unwrap();
        let err = object.require::<Nonce>().unwrap_err();
        assert_eq!(err.to_string(), "'nonce' could not be parsed");

        let err = UntypedObject::new().require::<Nonce>().unwrap_err();
        assert_eq!(err.to_string(), "'nonce' is missing");
    }

    #[test]
    fn insert_replaces_members() {
        let mut object = UntypedObject::new();
        object.insert(Nonce("a".into())).unwrap();
        object.insert(Nonce("b".into())).unwrap();
        assert_eq!(Json::from(object), json!({ "nonce": "b" }));
    }
}
