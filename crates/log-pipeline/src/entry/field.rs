// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Addressing into an entry's body, attributes or resource.
//!
//! A [`Field`] is a section plus a path of map keys. The empty path addresses
//! the whole section. Fields are written as expressions:
//!
//! ```text
//! body                      whole body
//! body.one.two              entry.body["one"]["two"]
//! attributes.key            entry.attributes["key"]
//! resource["host.name"]     a key that itself contains a dot
//! ```

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use super::{insert_at, lookup, remove_at, Entry};
use crate::errors::FieldError;

/// The entry section a field points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum FieldRoot {
    #[display("body")]
    Body,
    #[display("attributes")]
    Attributes,
    #[display("resource")]
    Resource,
}

impl FieldRoot {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "body" => Some(FieldRoot::Body),
            "attributes" => Some(FieldRoot::Attributes),
            "resource" => Some(FieldRoot::Resource),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    root: FieldRoot,
    keys: Vec<String>,
}

impl Field {
    pub fn new<I, S>(root: FieldRoot, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Field {
            root,
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn body<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(FieldRoot::Body, keys)
    }

    pub fn attribute<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(FieldRoot::Attributes, keys)
    }

    pub fn resource<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(FieldRoot::Resource, keys)
    }

    #[must_use]
    pub fn root(&self) -> FieldRoot {
        self.root
    }

    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// True when the field addresses the whole section.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.keys.is_empty()
    }

    /// True when `other` is in the same section and its path starts with this
    /// field's path. A field is a prefix of itself.
    #[must_use]
    pub fn is_prefix_of(&self, other: &Field) -> bool {
        self.root == other.root && other.keys.starts_with(&self.keys)
    }

    /// Returns the addressed value, or `None` when any part of the path is
    /// missing or crosses a non-map value.
    ///
    /// The whole attributes or resource section is returned as an owned map
    /// value; everything else is borrowed.
    pub fn get<'a>(&self, entry: &'a Entry) -> Option<Cow<'a, Value>> {
        match self.root {
            FieldRoot::Body => {
                let body = entry.body.as_ref()?;
                if self.is_root() {
                    return Some(Cow::Borrowed(body));
                }
                lookup(body.as_object()?, &self.keys).map(Cow::Borrowed)
            }
            FieldRoot::Attributes => section_get(entry.attributes.as_ref(), &self.keys),
            FieldRoot::Resource => section_get(entry.resource.as_ref(), &self.keys),
        }
    }

    /// Writes `value` at the addressed path, creating intermediate maps.
    ///
    /// The attributes and resource sections only accept a map at their root.
    pub fn set(&self, entry: &mut Entry, value: Value) -> Result<(), FieldError> {
        match self.root {
            FieldRoot::Body => {
                if self.is_root() {
                    entry.body = Some(value);
                    return Ok(());
                }
                let body = entry
                    .body
                    .get_or_insert_with(|| Value::Object(Map::new()));
                if !body.is_object() {
                    *body = Value::Object(Map::new());
                }
                if let Value::Object(map) = body {
                    insert_at(map, &self.keys, value);
                }
                Ok(())
            }
            FieldRoot::Attributes => {
                section_set(&mut entry.attributes, self.root, &self.keys, value)
            }
            FieldRoot::Resource => section_set(&mut entry.resource, self.root, &self.keys, value),
        }
    }

    /// Removes and returns the addressed value.
    pub fn delete(&self, entry: &mut Entry) -> Option<Value> {
        match self.root {
            FieldRoot::Body => {
                if self.is_root() {
                    return entry.body.take();
                }
                match entry.body.as_mut()? {
                    Value::Object(map) => remove_at(map, &self.keys),
                    _ => None,
                }
            }
            FieldRoot::Attributes => section_delete(&mut entry.attributes, &self.keys),
            FieldRoot::Resource => section_delete(&mut entry.resource, &self.keys),
        }
    }
}

fn section_get<'a>(
    section: Option<&'a Map<String, Value>>,
    keys: &[String],
) -> Option<Cow<'a, Value>> {
    let map = section?;
    if keys.is_empty() {
        return Some(Cow::Owned(Value::Object(map.clone())));
    }
    lookup(map, keys).map(Cow::Borrowed)
}

fn section_set(
    section: &mut Option<Map<String, Value>>,
    root: FieldRoot,
    keys: &[String],
    value: Value,
) -> Result<(), FieldError> {
    if keys.is_empty() {
        return match value {
            Value::Object(map) => {
                *section = Some(map);
                Ok(())
            }
            _ => Err(FieldError::NotAMap(root)),
        };
    }
    insert_at(section.get_or_insert_with(Map::new), keys, value);
    Ok(())
}

fn section_delete(section: &mut Option<Map<String, Value>>, keys: &[String]) -> Option<Value> {
    if keys.is_empty() {
        return section.take().map(Value::Object);
    }
    remove_at(section.as_mut()?, keys)
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)?;
        for key in &self.keys {
            if key.contains('\'') {
                write!(f, "[\"{key}\"]")?;
            } else if key.is_empty() || key.contains(['.', '[', ']', '"']) {
                write!(f, "['{key}']")?;
            } else {
                write!(f, ".{key}")?;
            }
        }
        Ok(())
    }
}

impl FromStr for Field {
    type Err = FieldError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let parse_error = |reason| FieldError::Parse {
            input: input.to_string(),
            reason,
        };

        let trimmed = input.trim();
        let root_end = trimmed.find(['.', '[']).unwrap_or(trimmed.len());
        let root = FieldRoot::parse(&trimmed[..root_end])
            .ok_or_else(|| parse_error("must start with body, attributes or resource"))?;

        let mut keys = Vec::new();
        let mut rest = &trimmed[root_end..];
        while !rest.is_empty() {
            if let Some(after_dot) = rest.strip_prefix('.') {
                let end = after_dot.find(['.', '[']).unwrap_or(after_dot.len());
                if end == 0 {
                    return Err(parse_error("empty key"));
                }
                keys.push(after_dot[..end].to_string());
                rest = &after_dot[end..];
            } else if let Some(after_bracket) = rest.strip_prefix('[') {
                let quote = after_bracket
                    .chars()
                    .next()
                    .filter(|c| *c == '\'' || *c == '"')
                    .ok_or_else(|| parse_error("bracketed keys must be quoted"))?;
                let quoted = &after_bracket[1..];
                let close = quoted
                    .find(quote)
                    .ok_or_else(|| parse_error("unterminated quoted key"))?;
                keys.push(quoted[..close].to_string());
                rest = quoted[close + 1..]
                    .strip_prefix(']')
                    .ok_or_else(|| parse_error("expected ']' after quoted key"))?;
            } else {
                return Err(parse_error("expected '.' or '[' between keys"));
            }
        }

        Ok(Field { root, keys })
    }
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Field {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let expression = String::deserialize(deserializer)?;
        expression.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry_with_body(body: Value) -> Entry {
        let mut entry = Entry::new();
        entry.body = Some(body);
        entry
    }

    #[test]
    fn test_parse_simple_paths() {
        assert_eq!("body".parse::<Field>().unwrap(), Field::body(Vec::<String>::new()));
        assert_eq!(
            "body.one.two".parse::<Field>().unwrap(),
            Field::body(["one", "two"])
        );
        assert_eq!(
            "attributes.key".parse::<Field>().unwrap(),
            Field::attribute(["key"])
        );
        assert_eq!(
            "resource.host".parse::<Field>().unwrap(),
            Field::resource(["host"])
        );
    }

    #[test]
    fn test_parse_bracketed_keys() {
        assert_eq!(
            r#"attributes["net.peer.ip"]"#.parse::<Field>().unwrap(),
            Field::attribute(["net.peer.ip"])
        );
        assert_eq!(
            "body.one['two.three'].four".parse::<Field>().unwrap(),
            Field::body(["one", "two.three", "four"])
        );
    }

    #[test]
    fn test_parse_errors() {
        for input in [
            "",
            "bodies.x",
            "body.",
            "body..x",
            "body[x]",
            "body['x'",
            "body['x'x",
            "bodyx",
        ] {
            assert!(
                input.parse::<Field>().is_err(),
                "'{input}' should not parse"
            );
        }
    }

    #[test]
    fn test_display_round_trips() {
        let field = Field::attribute(["net.peer.ip"]);
        assert_eq!(field.to_string(), "attributes['net.peer.ip']");
        assert_eq!(field.to_string().parse::<Field>().unwrap(), field);
        assert_eq!(Field::body(["one", "two"]).to_string(), "body.one.two");
    }

    #[test]
    fn test_serde_as_string() {
        let fields: Vec<Field> =
            serde_json::from_value(json!(["body.foo", "resource['host.name']"])).unwrap();
        assert_eq!(
            fields,
            vec![Field::body(["foo"]), Field::resource(["host.name"])]
        );
        assert_eq!(
            serde_json::to_value(&fields).unwrap(),
            json!(["body.foo", "resource['host.name']"])
        );
        assert!(serde_json::from_value::<Field>(json!("nope.foo")).is_err());
    }

    #[test]
    fn test_prefix_relation() {
        let one = Field::body(["one"]);
        let one_two = Field::body(["one", "two"]);
        assert!(one.is_prefix_of(&one_two));
        assert!(one.is_prefix_of(&one));
        assert!(!one_two.is_prefix_of(&one));
        assert!(Field::body(Vec::<String>::new()).is_prefix_of(&one_two));
        assert!(!Field::attribute(["one"]).is_prefix_of(&one_two));
    }

    #[test]
    fn test_get_missing_is_none() {
        let entry = entry_with_body(json!({"one": {"two": "x"}}));
        assert!(Field::body(["missing"]).get(&entry).is_none());
        assert!(Field::body(["one", "two", "three"]).get(&entry).is_none());
        assert!(Field::attribute(["key"]).get(&entry).is_none());
        assert!(Field::resource(Vec::<String>::new()).get(&entry).is_none());
    }

    #[test]
    fn test_get_nested_and_root() {
        let mut entry = entry_with_body(json!({"one": {"two": "x"}}));
        entry.add_attribute("key", "val");
        assert_eq!(
            Field::body(["one", "two"]).get(&entry).unwrap().into_owned(),
            json!("x")
        );
        assert_eq!(
            Field::body(Vec::<String>::new()).get(&entry).unwrap().into_owned(),
            json!({"one": {"two": "x"}})
        );
        assert_eq!(
            Field::attribute(Vec::<String>::new())
                .get(&entry)
                .unwrap()
                .into_owned(),
            json!({"key": "val"})
        );
    }

    #[test]
    fn test_set_creates_intermediate_maps() {
        let mut entry = Entry::new();
        Field::resource(["one", "two"])
            .set(&mut entry, json!("value"))
            .unwrap();
        assert_eq!(
            Value::Object(entry.resource.unwrap()),
            json!({"one": {"two": "value"}})
        );
    }

    #[test]
    fn test_set_body_over_scalar() {
        let mut entry = entry_with_body(json!("plain text"));
        Field::body(["parsed"]).set(&mut entry, json!(true)).unwrap();
        assert_eq!(entry.body, Some(json!({"parsed": true})));

        Field::body(Vec::<String>::new())
            .set(&mut entry, json!("replaced"))
            .unwrap();
        assert_eq!(entry.body, Some(json!("replaced")));
    }

    #[test]
    fn test_set_root_section_requires_map() {
        let mut entry = Entry::new();
        let root = Field::attribute(Vec::<String>::new());
        assert!(matches!(
            root.set(&mut entry, json!("scalar")),
            Err(FieldError::NotAMap(FieldRoot::Attributes))
        ));
        root.set(&mut entry, json!({"a": 1})).unwrap();
        assert_eq!(Value::Object(entry.attributes.unwrap()), json!({"a": 1}));
    }

    #[test]
    fn test_delete() {
        let mut entry = entry_with_body(json!({"one": {"two": 2}, "three": 3}));
        entry.add_resource_key("host", "a");

        assert_eq!(Field::body(["one", "two"]).delete(&mut entry), Some(json!(2)));
        assert_eq!(Field::body(["one", "two"]).delete(&mut entry), None);
        assert_eq!(entry.body, Some(json!({"one": {}, "three": 3})));

        assert_eq!(
            Field::resource(Vec::<String>::new()).delete(&mut entry),
            Some(json!({"host": "a"}))
        );
        assert!(entry.resource.is_none());
        assert_eq!(Field::attribute(["x"]).delete(&mut entry), None);
    }
}
