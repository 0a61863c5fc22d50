//! Shared type tests

use crate::*;
use serde_json::{json, Value};

#[test]
fn test_bool_round_trip() {
    for flag in [true, false] {
        let wire = ansible_to_proxmox_bool(Some(flag)).unwrap();
        assert_eq!(proxmox_to_ansible_bool(&Value::from(wire)), flag);
    }

    assert_eq!(ansible_to_proxmox_bool(None), None);
    assert_eq!(ansible_to_proxmox_bool(Some(true)), Some(1));
    assert_eq!(ansible_to_proxmox_bool(Some(false)), Some(0));
}

#[test]
fn test_proxmox_bool_quirks() {
    assert!(proxmox_to_ansible_bool(&json!(1)));
    assert!(!proxmox_to_ansible_bool(&json!(0)));
    assert!(!proxmox_to_ansible_bool(&json!(2)));
    assert!(!proxmox_to_ansible_bool(&json!(-1)));
    assert!(!proxmox_to_ansible_bool(&json!("1")));
    assert!(!proxmox_to_ansible_bool(&Value::Null));
}

#[test]
fn test_strip_nulls() {
    let object = json!({"comment": null, "nodes": "pve1", "restricted": 0});
    let stripped = strip_nulls(object.as_object().unwrap());

    assert_eq!(stripped.len(), 2);
    assert!(!stripped.contains_key("comment"));
}

#[test]
fn test_wire_string() {
    assert_eq!(wire_string(&json!(true)).as_deref(), Some("1"));
    assert_eq!(wire_string(&json!(24)).as_deref(), Some("24"));
    assert_eq!(wire_string(&json!("24")).as_deref(), Some("24"));
    assert_eq!(wire_string(&json!(["a", "b"])).as_deref(), Some("a,b"));
    assert_eq!(wire_string(&Value::Null), None);
}

#[test]
fn test_sorted_csv() {
    assert_eq!(sorted_csv("pve3,pve1, pve2"), "pve1,pve2,pve3");
    assert_eq!(sorted_csv(""), "");
}

#[test]
fn test_list_from_value() {
    assert!(list_from_value(Value::Null).unwrap().is_empty());
    assert_eq!(list_from_value(json!([{"a": 1}, {"b": 2}])).unwrap().len(), 2);
    assert!(list_from_value(json!("nope")).is_err());
}

#[test]
fn test_dhcp_range_parsing() {
    let range: DhcpRange =
        serde_json::from_value(json!({"start": "10.0.0.5", "end": "10.0.0.10"})).unwrap();
    assert_eq!(range.to_wire(), "start-address=10.0.0.5,end-address=10.0.0.10");

    let api = DhcpRange::from_value(&json!({
        "start-address": "10.0.0.5",
        "end-address": "10.0.0.10"
    }))
    .unwrap();
    assert_eq!(api, range);

    let wire = DhcpRange::from_wire("start-address=10.0.0.5,end-address=10.0.0.10").unwrap();
    assert_eq!(wire, range);
}

#[test]
fn test_dhcp_range_validation() {
    assert!(DhcpRange::from_wire("start-address=10.0.0.9,end-address=10.0.0.1").is_err());
    assert!(DhcpRange::from_wire("start-address=10.0.0.1,end-address=fd00::1").is_err());
    assert!(DhcpRange::from_wire("start-address=10.0.0.1").is_err());
    assert!(DhcpRange::from_wire("start-address=nope,end-address=10.0.0.1").is_err());
}

#[test]
fn test_dhcp_range_list() {
    let ranges = DhcpRange::list_from_value(Some(&json!([
        {"start-address": "10.10.2.5", "end-address": "10.10.2.25"},
        "start-address=10.10.2.50,end-address=10.10.2.100"
    ])))
    .unwrap();
    assert_eq!(ranges.len(), 2);
    assert!(DhcpRange::list_from_value(None).unwrap().is_empty());
}

#[test]
fn test_zone_type_parsing() {
    assert_eq!("qinq".parse::<ZoneType>().unwrap(), ZoneType::QinQ);
    assert_eq!("VXLAN".parse::<ZoneType>().unwrap(), ZoneType::Vxlan);
    assert!("bogus".parse::<ZoneType>().is_err());
    assert_eq!(
        serde_json::from_value::<ZoneType>(json!("qinq")).unwrap(),
        ZoneType::QinQ
    );
}
