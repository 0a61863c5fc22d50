//! Static field tables for resources whose payload depends on a type
//!
//! A table lists every parameter once with its wire name, value kind, the
//! types it applies to and the types that require it. Payloads are built
//! from the table instead of per-type conditionals.

use serde_json::Value;

use pve_shared_types::{wire_string, ManagedObject};

use crate::error::ReconcileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Str,
    Int,
    Bool,
    /// Sent as a comma separated list.
    List,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Module parameter name.
    pub param: &'static str,
    /// API field name.
    pub wire: &'static str,
    pub kind: FieldKind,
    /// Types the field is valid for; empty means every type.
    pub applies_to: &'static [&'static str],
    /// Types that cannot be created without the field.
    pub required_for: &'static [&'static str],
    /// May be cleared through the `delete` list.
    pub deletable: bool,
}

impl FieldSpec {
    pub const fn new(param: &'static str, wire: &'static str, kind: FieldKind) -> Self {
        Self {
            param,
            wire,
            kind,
            applies_to: &[],
            required_for: &[],
            deletable: false,
        }
    }

    pub const fn only(self, applies_to: &'static [&'static str]) -> Self {
        Self { applies_to, ..self }
    }

    pub const fn required(self, required_for: &'static [&'static str]) -> Self {
        Self {
            required_for,
            ..self
        }
    }

    pub const fn deletable(self) -> Self {
        Self {
            deletable: true,
            ..self
        }
    }

    pub fn applies(&self, variant: &str) -> bool {
        self.applies_to.is_empty() || self.applies_to.contains(&variant)
    }

    pub fn is_required(&self, variant: &str) -> bool {
        self.required_for.contains(&variant)
    }

    fn encode(&self, value: &Value) -> Result<Value, ReconcileError> {
        let invalid = || {
            ReconcileError::validation(format!(
                "invalid value for {}: {}",
                self.param, value
            ))
        };

        match self.kind {
            FieldKind::Str | FieldKind::List => wire_string(value).map(Value::from).ok_or_else(invalid),
            FieldKind::Int => match value {
                Value::Number(number) if number.is_i64() || number.is_u64() => Ok(value.clone()),
                Value::String(text) => text
                    .trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| invalid()),
                _ => Err(invalid()),
            },
            FieldKind::Bool => match value {
                Value::Bool(flag) => Ok(Value::from(u8::from(*flag))),
                Value::Number(number) if matches!(number.as_u64(), Some(0 | 1)) => Ok(value.clone()),
                _ => Err(invalid()),
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResourceSchema {
    pub resource: &'static str,
    pub fields: &'static [FieldSpec],
}

fn is_set(params: &ManagedObject, name: &str) -> bool {
    params.get(name).map_or(false, |value| !value.is_null())
}

impl ResourceSchema {
    pub fn field(&self, param: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.param == param)
    }

    /// Fail with every parameter `variant` requires but `params` lacks,
    /// sorted by name.
    pub fn validate_required(
        &self,
        variant: &str,
        id: &str,
        params: &ManagedObject,
    ) -> Result<(), ReconcileError> {
        let mut missing: Vec<String> = self
            .fields
            .iter()
            .filter(|field| field.is_required(variant) && !is_set(params, field.param))
            .map(|field| field.param.to_string())
            .collect();

        if missing.is_empty() {
            return Ok(());
        }

        missing.sort();
        Err(ReconcileError::MissingParameters {
            resource: format!("{} {} of type {}", self.resource, id, variant),
            missing,
        })
    }

    /// Fail on parameters that are set but meaningless for `variant`.
    pub fn validate_applicable(
        &self,
        variant: &str,
        params: &ManagedObject,
    ) -> Result<(), ReconcileError> {
        let mut unexpected: Vec<&str> = self
            .fields
            .iter()
            .filter(|field| !field.applies(variant) && is_set(params, field.param))
            .map(|field| field.param)
            .collect();

        if unexpected.is_empty() {
            return Ok(());
        }

        unexpected.sort_unstable();
        Err(ReconcileError::validation(format!(
            "parameters {} are not valid for {} type {}",
            unexpected.join(", "),
            self.resource,
            variant
        )))
    }

    /// API payload for `variant`: every set parameter that applies, under
    /// its wire name and encoded for its kind.
    pub fn build_payload(
        &self,
        variant: &str,
        params: &ManagedObject,
    ) -> Result<ManagedObject, ReconcileError> {
        let mut payload = ManagedObject::new();
        for field in self.fields.iter().filter(|field| field.applies(variant)) {
            if let Some(value) = params.get(field.param).filter(|value| !value.is_null()) {
                payload.insert(field.wire.to_string(), field.encode(value)?);
            }
        }
        Ok(payload)
    }

    /// Translate requested deletions to wire names, rejecting fields that
    /// cannot be cleared.
    pub fn deletion_list(
        &self,
        variant: &str,
        requested: &[String],
    ) -> Result<Vec<&'static str>, ReconcileError> {
        requested
            .iter()
            .map(|name| {
                self.fields
                    .iter()
                    .find(|field| field.param == name || field.wire == name)
                    .filter(|field| field.deletable && field.applies(variant))
                    .map(|field| field.wire)
                    .ok_or_else(|| {
                        ReconcileError::validation(format!(
                            "{} field '{}' cannot be deleted for type {}",
                            self.resource, name, variant
                        ))
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const FIELDS: &[FieldSpec] = &[
        FieldSpec::new("bridge", "bridge", FieldKind::Str)
            .only(&["vlan", "qinq"])
            .required(&["vlan", "qinq"]),
        FieldSpec::new("tag", "tag", FieldKind::Int)
            .only(&["qinq"])
            .required(&["qinq"]),
        FieldSpec::new("nodes", "nodes", FieldKind::List).deletable(),
        FieldSpec::new("vlan_aware", "vlanaware", FieldKind::Bool).deletable(),
    ];

    const SCHEMA: ResourceSchema = ResourceSchema {
        resource: "zone",
        fields: FIELDS,
    };

    fn params(value: Value) -> ManagedObject {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_required_fields_sorted() {
        let err = SCHEMA
            .validate_required("qinq", "z1", &params(json!({"tag": null})))
            .unwrap_err();
        match err {
            ReconcileError::MissingParameters { missing, .. } => {
                assert_eq!(missing, vec!["bridge".to_string(), "tag".to_string()])
            }
            other => panic!("unexpected error {other:?}"),
        }

        assert!(SCHEMA.validate_required("simple", "z1", &ManagedObject::new()).is_ok());
    }

    #[test]
    fn test_payload_encoding() {
        let payload = SCHEMA
            .build_payload(
                "qinq",
                &params(json!({"bridge": "vmbr0", "tag": "100", "nodes": ["pve1", "pve2"], "vlan_aware": true})),
            )
            .unwrap();

        assert_eq!(payload["tag"], json!(100));
        assert_eq!(payload["nodes"], json!("pve1,pve2"));
        assert_eq!(payload["vlanaware"], json!(1));
    }

    #[test]
    fn test_inapplicable_fields() {
        let input = params(json!({"bridge": "vmbr0"}));
        assert!(SCHEMA.validate_applicable("simple", &input).is_err());
        assert!(SCHEMA.build_payload("simple", &input).unwrap().is_empty());
        assert!(SCHEMA.validate_applicable("vlan", &input).is_ok());
    }

    #[test]
    fn test_deletion_list() {
        let wire = SCHEMA
            .deletion_list("vlan", &["vlan_aware".to_string(), "nodes".to_string()])
            .unwrap();
        assert_eq!(wire, vec!["vlanaware", "nodes"]);
        assert!(SCHEMA.deletion_list("vlan", &["bridge".to_string()]).is_err());
    }

    #[test]
    fn test_invalid_int() {
        let result = SCHEMA.build_payload("qinq", &params(json!({"tag": "ten"})));
        assert!(matches!(result, Err(ReconcileError::Validation(_))));
    }
}
