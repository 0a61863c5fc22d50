//! Cluster resource reconciler tests

use crate::*;
use pve_api_client::MockProxmoxApi;
use pve_reconcile_core::{ExecutionMode, ReconcileError};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

fn params<T: DeserializeOwned>(value: Value) -> T {
    serde_json::from_value(value).unwrap()
}

fn acl_fixture() -> Value {
    json!([
        {"path": "/vms/100", "roleid": "PVEVMUser", "type": "user", "ugid": "a01mako@pam"},
        {"path": "/vms/100", "roleid": "PVEAdmin", "type": "group", "ugid": "ops", "propagate": 0},
        {"path": "/storage/local", "roleid": "PVEDatastoreUser", "type": "user", "ugid": "a01mako@pam", "propagate": 1}
    ])
}

#[tokio::test]
async fn test_acl_already_present() {
    let api = MockProxmoxApi::new().with_response("GET", "/access/acl", acl_fixture());

    let outcome = acl::run(
        &api,
        params(json!({
            "state": "present",
            "path": "/vms/100",
            "roleid": "PVEVMUser",
            "type": "user",
            "ugid": "a01mako@pam"
        })),
        ExecutionMode::Apply,
    )
    .await
    .unwrap();

    assert!(!outcome.changed);
    assert_eq!(outcome.data["old_acls"].as_array().unwrap().len(), 3);
    assert!(!outcome.data.contains_key("new_acls"));
    assert_eq!(api.write_count(), 0);
}

#[tokio::test]
async fn test_acl_grant() {
    let api = MockProxmoxApi::new().with_response("GET", "/access/acl", acl_fixture());

    let outcome = acl::run(
        &api,
        params(json!({
            "state": "present",
            "path": "/vms/101",
            "roleid": "PVEVMUser",
            "type": "user",
            "ugid": "a01mako@pam"
        })),
        ExecutionMode::Apply,
    )
    .await
    .unwrap();

    assert!(outcome.changed);
    assert!(outcome.data.contains_key("new_acls"));
    assert_eq!(api.count("PUT", "/access/acl"), 1);

    let put = &api.calls_with_method("PUT")[0];
    assert_eq!(put.params["path"], json!("/vms/101"));
    assert_eq!(put.params["roles"], json!("PVEVMUser"));
    assert_eq!(put.params["users"], json!("a01mako@pam"));
    assert_eq!(put.params["propagate"], json!(1));
}

#[tokio::test]
async fn test_acl_propagate_change_is_an_update() {
    let api = MockProxmoxApi::new().with_response("GET", "/access/acl", acl_fixture());

    let outcome = acl::run(
        &api,
        params(json!({
            "state": "present",
            "path": "/vms/100",
            "roleid": "PVEAdmin",
            "type": "group",
            "ugid": "ops"
        })),
        ExecutionMode::Apply,
    )
    .await
    .unwrap();

    assert!(outcome.changed);
    let put = &api.calls_with_method("PUT")[0];
    assert_eq!(put.params["groups"], json!("ops"));
    assert_eq!(put.params["propagate"], json!(1));
}

#[tokio::test]
async fn test_acl_missing_parameters() {
    let api = MockProxmoxApi::new();

    let result = acl::run(
        &api,
        params(json!({"state": "present", "path": "/vms/100"})),
        ExecutionMode::Apply,
    )
    .await;

    match result {
        Err(ReconcileError::MissingParameters { missing, .. }) => {
            assert_eq!(missing, vec!["roleid", "type", "ugid"])
        }
        other => panic!("unexpected result {other:?}"),
    }
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn test_acl_absent_removes_every_match() {
    let api = MockProxmoxApi::new().with_response("GET", "/access/acl", acl_fixture());

    let outcome = acl::run(
        &api,
        params(json!({"state": "absent", "path": "/vms/100"})),
        ExecutionMode::Apply,
    )
    .await
    .unwrap();

    assert!(outcome.changed);
    let puts = api.calls_with_method("PUT");
    assert_eq!(puts.len(), 2);
    assert_eq!(puts[0].params["users"], json!("a01mako@pam"));
    assert_eq!(puts[0].params["propagate"], json!(1));
    assert_eq!(puts[1].params["groups"], json!("ops"));
    assert_eq!(puts[1].params["propagate"], json!(0));
    assert!(puts.iter().all(|put| put.params["delete"] == json!(1)));
}

#[tokio::test]
async fn test_acl_dry_run() {
    let api = MockProxmoxApi::new().with_response("GET", "/access/acl", acl_fixture());

    let outcome = acl::run(
        &api,
        params(json!({"state": "absent", "path": "/vms/100", "type": "group"})),
        ExecutionMode::DryRun,
    )
    .await
    .unwrap();

    assert!(outcome.changed);
    assert!(!outcome.data.contains_key("new_acls"));
    assert_eq!(api.write_count(), 0);
}

#[tokio::test]
async fn test_ha_group_lifecycle() {
    let api = MockProxmoxApi::new()
        .with_response("GET", "/cluster/ha/groups", json!([]))
        .with_response(
            "GET",
            "/cluster/ha/groups",
            json!([{"group": "ha0", "nodes": "pve2,pve1", "type": "group", "digest": "0a1b"}]),
        );
    let group = |nofailback: bool| {
        params::<HaGroupParams>(json!({
            "state": "present",
            "name": "ha0",
            "nodes": ["pve1", "pve2"],
            "nofailback": nofailback
        }))
    };

    let created = ha_group::run(&api, group(false), ExecutionMode::Apply).await.unwrap();
    assert!(created.changed);
    let post = &api.calls_with_method("POST")[0];
    assert_eq!(post.path, "/cluster/ha/groups");
    assert_eq!(post.params["group"], json!("ha0"));
    assert_eq!(post.params["nodes"], json!("pve1,pve2"));

    let again = ha_group::run(&api, group(false), ExecutionMode::Apply).await.unwrap();
    assert!(!again.changed);

    let updated = ha_group::run(&api, group(true), ExecutionMode::Apply).await.unwrap();
    assert!(updated.changed);
    let put = &api.calls_with_method("PUT")[0];
    assert_eq!(put.path, "/cluster/ha/groups/ha0");
    assert_eq!(put.params["nofailback"], json!(1));

    assert_eq!(api.write_count(), 2);
}

#[tokio::test]
async fn test_ha_group_needs_nodes() {
    let api = MockProxmoxApi::new().with_response("GET", "/cluster/ha/groups", json!([]));

    let result = ha_group::run(
        &api,
        params(json!({"state": "present", "name": "ha0"})),
        ExecutionMode::Apply,
    )
    .await;

    assert!(matches!(result, Err(ReconcileError::MissingParameters { .. })));
}

#[tokio::test]
async fn test_ha_group_absent() {
    let api = MockProxmoxApi::new().with_response(
        "GET",
        "/cluster/ha/groups",
        json!([{"group": "ha0", "nodes": "pve1"}]),
    );

    let outcome = ha_group::run(
        &api,
        params(json!({"state": "absent", "name": "ha0"})),
        ExecutionMode::Apply,
    )
    .await
    .unwrap();

    assert!(outcome.changed);
    assert_eq!(api.count("DELETE", "/cluster/ha/groups/ha0"), 1);
}

fn ha_rules() -> Value {
    json!([{
        "rule": "keep-web",
        "type": "node-affinity",
        "nodes": "pve2,pve1",
        "resources": "vm:101,vm:100",
        "digest": "ff00"
    }])
}

#[tokio::test]
async fn test_ha_rule_unchanged_after_normalisation() {
    let api = MockProxmoxApi::new().with_response("GET", "/cluster/ha/rules", ha_rules());

    let outcome = ha_rule::run(
        &api,
        params(json!({
            "state": "present",
            "name": "keep-web",
            "type": "node-affinity",
            "nodes": ["pve1", "pve2"],
            "resources": ["vm:100", "vm:101"],
            "disable": false,
            "comment": ""
        })),
        ExecutionMode::Apply,
    )
    .await
    .unwrap();

    assert!(!outcome.changed);
    assert_eq!(outcome.data["diff"]["before"]["nodes"], json!("pve1,pve2"));
    assert_eq!(api.write_count(), 0);
}

#[tokio::test]
async fn test_ha_rule_update() {
    let api = MockProxmoxApi::new().with_response("GET", "/cluster/ha/rules", ha_rules());

    let outcome = ha_rule::run(
        &api,
        params(json!({
            "state": "present",
            "name": "keep-web",
            "type": "node-affinity",
            "strict": true
        })),
        ExecutionMode::Apply,
    )
    .await
    .unwrap();

    assert!(outcome.changed);
    assert_eq!(outcome.data["diff"]["after"]["strict"], json!(1));
    let put = &api.calls_with_method("PUT")[0];
    assert_eq!(put.path, "/cluster/ha/rules/keep-web");
    assert_eq!(put.params["strict"], json!(1));
}

#[tokio::test]
async fn test_ha_rule_type_change_needs_force() {
    let api = MockProxmoxApi::new().with_response("GET", "/cluster/ha/rules", ha_rules());
    let rule = |force: bool| {
        params::<HaRuleParams>(json!({
            "state": "present",
            "name": "keep-web",
            "type": "resource-affinity",
            "affinity": "negative",
            "resources": ["vm:100", "vm:101"],
            "force": force
        }))
    };

    let refused = ha_rule::run(&api, rule(false), ExecutionMode::Apply).await;
    assert!(matches!(refused, Err(ReconcileError::Validation(_))));
    assert_eq!(api.write_count(), 0);

    let replaced = ha_rule::run(&api, rule(true), ExecutionMode::Apply).await.unwrap();
    assert!(replaced.changed);
    assert_eq!(api.count("DELETE", "/cluster/ha/rules/keep-web"), 1);
    let post = &api.calls_with_method("POST")[0];
    assert_eq!(post.params["affinity"], json!("negative"));
    assert_eq!(post.params["resources"], json!("vm:100,vm:101"));
    assert!(!post.params.contains_key("nodes"));
}

#[tokio::test]
async fn test_ha_rule_forced_type_change_checks_fields_first() {
    let api = MockProxmoxApi::new().with_response("GET", "/cluster/ha/rules", ha_rules());

    let result = ha_rule::run(
        &api,
        params(json!({
            "state": "present",
            "name": "keep-web",
            "type": "resource-affinity",
            "resources": ["vm:100"],
            "force": true
        })),
        ExecutionMode::Apply,
    )
    .await;

    match result {
        Err(ReconcileError::MissingParameters { missing, .. }) => {
            assert_eq!(missing, vec!["affinity"])
        }
        other => panic!("unexpected result {other:?}"),
    }
    assert_eq!(api.write_count(), 0);
}

#[tokio::test]
async fn test_ha_rule_create_requires_fields() {
    let api = MockProxmoxApi::new().with_response("GET", "/cluster/ha/rules", json!([]));

    let result = ha_rule::run(
        &api,
        params(json!({"state": "present", "name": "r1", "type": "node-affinity", "nodes": ["pve1"]})),
        ExecutionMode::Apply,
    )
    .await;

    match result {
        Err(ReconcileError::MissingParameters { missing, .. }) => {
            assert_eq!(missing, vec!["resources"])
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn test_firewall_parameter_rules() {
    let present_both: FirewallParams = params(json!({
        "group_conf": true,
        "group": "web",
        "rules": [{"action": "ACCEPT", "type": "in", "pos": 0}]
    }));
    assert!(present_both.validate().is_err());

    let present_neither: FirewallParams = params(json!({}));
    assert!(present_neither.validate().is_err());

    let vm_without_id: FirewallParams = params(json!({
        "level": "vm",
        "rules": [{"action": "ACCEPT", "type": "in", "pos": 0}]
    }));
    assert!(matches!(
        vm_without_id.validate(),
        Err(ReconcileError::MissingParameters { .. })
    ));

    let absent_pos: FirewallParams = params(json!({"state": "absent", "pos": 3}));
    assert!(absent_pos.validate().is_ok());
}

#[tokio::test]
async fn test_firewall_rule_created_and_moved() {
    let api = MockProxmoxApi::new()
        .with_response("GET", "/cluster/firewall/rules", json!([]))
        .with_response(
            "GET",
            "/cluster/firewall/rules/0",
            json!({
                "pos": 0, "action": "ACCEPT", "type": "in", "proto": "tcp",
                "dport": "22", "enable": 1, "digest": "9f", "ipversion": 4
            }),
        );

    let outcome = firewall::run(
        &api,
        params(json!({
            "rules": [{
                "action": "ACCEPT", "type": "in", "pos": 2,
                "proto": "tcp", "dport": "22", "enable": true
            }]
        })),
        ExecutionMode::Apply,
    )
    .await
    .unwrap();

    assert!(outcome.changed);
    assert!(outcome.warnings.is_empty());
    let post = &api.calls_with_method("POST")[0];
    assert_eq!(post.path, "/cluster/firewall/rules");
    assert_eq!(post.params["enable"], json!(1));

    let put = &api.calls_with_method("PUT")[0];
    assert_eq!(put.path, "/cluster/firewall/rules/0");
    assert_eq!(put.params["moveto"], json!(3));
}

#[tokio::test]
async fn test_firewall_rule_not_moved_when_foreign() {
    let api = MockProxmoxApi::new()
        .with_response("GET", "/cluster/firewall/rules", json!([]))
        .with_response(
            "GET",
            "/cluster/firewall/rules/0",
            json!({"pos": 0, "action": "DROP", "type": "in"}),
        );

    let outcome = firewall::run(
        &api,
        params(json!({"rules": [{"action": "ACCEPT", "type": "in", "pos": 2}]})),
        ExecutionMode::Apply,
    )
    .await
    .unwrap();

    assert_eq!(outcome.warnings.len(), 1);
    assert!(api.calls_with_method("PUT").is_empty());
}

#[tokio::test]
async fn test_firewall_rule_update_needs_update_flag() {
    let existing = json!([{"pos": 0, "action": "DROP", "type": "in", "digest": "d1", "ipversion": 4}]);
    let api = MockProxmoxApi::new()
        .with_response("GET", "/cluster/firewall/rules", existing)
        .with_response("GET", "/cluster/firewall/rules/0", json!({"pos": 0, "digest": "d2"}));
    let rules = json!([{"action": "ACCEPT", "type": "in", "pos": 0}]);

    let refused = firewall::run(
        &api,
        params(json!({"rules": rules.clone(), "update": false})),
        ExecutionMode::Apply,
    )
    .await;
    assert!(matches!(refused, Err(ReconcileError::Validation(_))));
    assert_eq!(api.write_count(), 0);

    firewall::run(&api, params(json!({"rules": rules})), ExecutionMode::Apply)
        .await
        .unwrap();
    let put = &api.calls_with_method("PUT")[0];
    assert_eq!(put.path, "/cluster/firewall/rules/0");
    assert_eq!(put.params["digest"], json!("d2"));
    assert_eq!(put.params["action"], json!("ACCEPT"));
}

#[tokio::test]
async fn test_firewall_vm_rule_removed() {
    let rules_path = "/nodes/pve1/qemu/100/firewall/rules";
    let api = MockProxmoxApi::new()
        .with_response(
            "GET",
            "/cluster/resources",
            json!([
                {"vmid": 100, "node": "pve1", "type": "qemu"},
                {"vmid": 200, "node": "pve2", "type": "lxc"}
            ]),
        )
        .with_response("GET", rules_path, json!([{"pos": 1, "action": "ACCEPT", "type": "in"}]))
        .with_response("GET", "/nodes/pve1/qemu/100/firewall/rules/1", json!({"digest": "abc"}));

    let outcome = firewall::run(
        &api,
        params(json!({"state": "absent", "level": "vm", "vmid": 100, "pos": 1})),
        ExecutionMode::Apply,
    )
    .await
    .unwrap();

    assert!(outcome.changed);
    let delete = &api.calls_with_method("DELETE")[0];
    assert_eq!(delete.path, "/nodes/pve1/qemu/100/firewall/rules/1");
    assert_eq!(delete.params["digest"], json!("abc"));
    assert_eq!(delete.params["pos"], json!(1));
}

#[tokio::test]
async fn test_firewall_unknown_vm() {
    let api = MockProxmoxApi::new().with_response("GET", "/cluster/resources", json!([]));

    let result = firewall::run(
        &api,
        params(json!({"state": "absent", "level": "vm", "vmid": 100, "pos": 1})),
        ExecutionMode::Apply,
    )
    .await;

    assert!(matches!(result, Err(ReconcileError::Validation(_))));
}

#[tokio::test]
async fn test_firewall_aliases() {
    let api = MockProxmoxApi::new().with_response(
        "GET",
        "/cluster/firewall/aliases",
        json!([
            {"name": "web", "cidr": "10.0.0.10", "digest": "a", "ipversion": 4},
            {"name": "db", "cidr": "10.0.0.20", "digest": "a", "ipversion": 4}
        ]),
    );

    let outcome = firewall::run(
        &api,
        params(json!({"aliases": [{"name": "web", "cidr": "10.0.0.10"}]})),
        ExecutionMode::Apply,
    )
    .await
    .unwrap();
    assert!(!outcome.changed);

    firewall::run(
        &api,
        params(json!({"state": "absent", "aliases": [{"name": "web"}, {"name": "mail"}]})),
        ExecutionMode::Apply,
    )
    .await
    .unwrap();
    let deletes = api.calls_with_method("DELETE");
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0].path, "/cluster/firewall/aliases/web");

    let node_level = firewall::run(
        &api,
        params(json!({"level": "node", "node": "pve1", "aliases": [{"name": "web"}]})),
        ExecutionMode::Apply,
    )
    .await;
    assert!(node_level.is_err());
}

#[tokio::test]
async fn test_security_group() {
    let api = MockProxmoxApi::new().with_response(
        "GET",
        "/cluster/firewall/groups",
        json!([{"group": "web", "digest": "1"}]),
    );

    let existing = firewall::run(
        &api,
        params(json!({"group_conf": true, "group": "web"})),
        ExecutionMode::Apply,
    )
    .await
    .unwrap();
    assert!(!existing.changed);

    let created = firewall::run(
        &api,
        params(json!({"group_conf": true, "group": "db", "comment": "database"})),
        ExecutionMode::Apply,
    )
    .await
    .unwrap();
    assert!(created.changed);
    assert_eq!(created.data["group"], json!("db"));
    let post = &api.calls_with_method("POST")[0];
    assert_eq!(post.params["comment"], json!("database"));
}

#[tokio::test]
async fn test_ldap_realm_created() {
    let api = MockProxmoxApi::new().with_response("GET", "/access/domains", json!([{"realm": "pam"}]));

    let outcome = domain::run(
        &api,
        params(json!({
            "state": "present",
            "realm": "corp",
            "type": "ldap",
            "base_dn": "dc=corp,dc=example",
            "user_attr": "uid",
            "server1": "ldap.corp.example",
            "verify": true,
            "sync_defaults_options": {"enable_new": true, "scope": "users"}
        })),
        ExecutionMode::Apply,
    )
    .await
    .unwrap();

    assert!(outcome.changed);
    assert_eq!(outcome.msg, "Domain corp added.");
    let post = &api.calls_with_method("POST")[0];
    assert_eq!(post.path, "/access/domains");
    assert_eq!(post.params["type"], json!("ldap"));
    assert_eq!(post.params["verify"], json!(1));
    assert_eq!(post.params["sync-defaults-options"], json!("enable-new=1,scope=users"));
}

#[tokio::test]
async fn test_realm_password_not_compared() {
    let api = MockProxmoxApi::new()
        .with_response("GET", "/access/domains", json!([{"realm": "corp", "type": "ad"}]))
        .with_response(
            "GET",
            "/access/domains/corp",
            json!({
                "type": "ad", "domain": "corp.example", "server1": "dc1.corp.example",
                "case-sensitive": 1, "digest": "77"
            }),
        );

    let outcome = domain::run(
        &api,
        params(json!({
            "state": "present",
            "realm": "corp",
            "type": "ad",
            "domain": "corp.example",
            "server1": "dc1.corp.example",
            "password": "secret"
        })),
        ExecutionMode::Apply,
    )
    .await
    .unwrap();

    assert!(!outcome.changed);
    assert_eq!(api.write_count(), 0);
}

#[tokio::test]
async fn test_realm_edit_drops_type() {
    let api = MockProxmoxApi::new()
        .with_response("GET", "/access/domains", json!([{"realm": "corp", "type": "ad"}]))
        .with_response(
            "GET",
            "/access/domains/corp",
            json!({"type": "ad", "domain": "corp.example", "server1": "dc1", "case-sensitive": 1}),
        );

    domain::run(
        &api,
        params(json!({
            "state": "present",
            "realm": "corp",
            "type": "ad",
            "domain": "corp.example",
            "server1": "dc2"
        })),
        ExecutionMode::Apply,
    )
    .await
    .unwrap();

    let put = &api.calls_with_method("PUT")[0];
    assert_eq!(put.path, "/access/domains/corp");
    assert_eq!(put.params["server1"], json!("dc2"));
    assert!(!put.params.contains_key("type"));
}

#[tokio::test]
async fn test_realm_required_fields() {
    let api = MockProxmoxApi::new().with_response("GET", "/access/domains", json!([]));

    let result = domain::run(
        &api,
        params(json!({"state": "present", "realm": "sso", "type": "openid"})),
        ExecutionMode::Apply,
    )
    .await;

    match result {
        Err(ReconcileError::MissingParameters { missing, .. }) => {
            assert_eq!(missing, vec!["client_id", "issuer_url"])
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[tokio::test]
async fn test_realm_sync() {
    let api = MockProxmoxApi::new().with_response("GET", "/access/domains", json!([{"realm": "corp"}]));

    let outcome = domain::run(
        &api,
        params(json!({
            "state": "sync",
            "realm": "corp",
            "sync_defaults_options": {"remove_vanished": "acl;entry", "scope": "both"}
        })),
        ExecutionMode::Apply,
    )
    .await
    .unwrap();
    assert!(outcome.changed);
    let post = &api.calls_with_method("POST")[0];
    assert_eq!(post.path, "/access/domains/corp/sync");
    assert_eq!(post.params["remove-vanished"], json!("acl;entry"));

    let missing = domain::run(
        &api,
        params(json!({"state": "sync", "realm": "other"})),
        ExecutionMode::Apply,
    )
    .await;
    assert!(missing.is_err());
}

#[tokio::test]
async fn test_ha_resource_lifecycle() {
    let api = MockProxmoxApi::new()
        .with_response("GET", "/cluster/ha/resources", json!([]))
        .with_response(
            "GET",
            "/cluster/ha/resources",
            json!([{"sid": "vm:100", "state": "started", "type": "vm", "digest": "c0"}]),
        );
    let resource = |max_restart: u32| {
        params::<HaResourceParams>(json!({
            "state": "present",
            "name": "vm:100",
            "max_restart": max_restart
        }))
    };

    let created = ha_resource::run(&api, resource(1), ExecutionMode::Apply).await.unwrap();
    assert!(created.changed);
    assert_eq!(created.data["sid"], json!("vm:100"));
    let post = &api.calls_with_method("POST")[0];
    assert_eq!(post.path, "/cluster/ha/resources");
    assert_eq!(post.params["sid"], json!("vm:100"));
    assert_eq!(post.params["state"], json!("started"));
    assert!(!post.params.contains_key("group"));

    let again = ha_resource::run(&api, resource(1), ExecutionMode::Apply).await.unwrap();
    assert!(!again.changed);

    let updated = ha_resource::run(&api, resource(3), ExecutionMode::Apply).await.unwrap();
    assert!(updated.changed);
    let put = &api.calls_with_method("PUT")[0];
    assert_eq!(put.path, "/cluster/ha/resources/vm%3A100");
    assert_eq!(put.params["max_restart"], json!(3));

    assert_eq!(api.write_count(), 2);
}

#[tokio::test]
async fn test_ha_resource_state_and_group_change() {
    let api = MockProxmoxApi::new().with_response(
        "GET",
        "/cluster/ha/resources",
        json!([{"sid": "ct:200", "state": "started", "group": "ha0", "max_relocate": 1}]),
    );

    let unchanged = ha_resource::run(
        &api,
        params(json!({"state": "present", "name": "ct:200"})),
        ExecutionMode::Apply,
    )
    .await
    .unwrap();
    assert!(!unchanged.changed);

    let stopped = ha_resource::run(
        &api,
        params(json!({"state": "present", "name": "ct:200", "hastate": "stopped", "group": "ha1"})),
        ExecutionMode::DryRun,
    )
    .await
    .unwrap();
    assert!(stopped.changed);
    assert_eq!(api.write_count(), 0);
}

#[tokio::test]
async fn test_ha_resource_absent() {
    let api = MockProxmoxApi::new().with_response(
        "GET",
        "/cluster/ha/resources",
        json!([{"sid": "vm:100", "state": "started"}]),
    );

    let removed = ha_resource::run(
        &api,
        params(json!({"state": "absent", "name": "vm:100"})),
        ExecutionMode::Apply,
    )
    .await
    .unwrap();
    assert!(removed.changed);
    assert_eq!(api.count("DELETE", "/cluster/ha/resources/vm%3A100"), 1);

    let missing = ha_resource::run(
        &api,
        params(json!({"state": "absent", "name": "vm:999"})),
        ExecutionMode::Apply,
    )
    .await
    .unwrap();
    assert!(!missing.changed);
}

fn ipset_api() -> MockProxmoxApi {
    MockProxmoxApi::new()
        .with_response(
            "GET",
            "/cluster/firewall/ipset",
            json!([{"name": "mgmt", "comment": "management", "digest": "e1"}]),
        )
        .with_response(
            "GET",
            "/cluster/firewall/ipset/mgmt",
            json!([
                {"cidr": "10.0.0.0/24", "digest": "e1"},
                {"cidr": "10.0.9.9", "nomatch": 1, "digest": "e1"}
            ]),
        )
}

#[test]
fn test_ip_sets_are_exclusive() {
    let both: FirewallParams = params(json!({
        "aliases": [{"name": "web", "cidr": "10.0.0.10"}],
        "ip_sets": [{"name": "mgmt"}]
    }));
    assert!(matches!(both.validate(), Err(ReconcileError::Validation(_))));

    let absent_pos: FirewallParams = params(json!({
        "state": "absent",
        "pos": 1,
        "ip_sets": [{"name": "mgmt"}]
    }));
    assert!(absent_pos.validate().is_err());
}

#[tokio::test]
async fn test_ip_set_already_present() {
    let api = ipset_api();

    let outcome = firewall::run(
        &api,
        params(json!({"ip_sets": [{
            "name": "mgmt",
            "cidrs": [{"cidr": "10.0.0.0/24"}, {"cidr": "10.0.9.9", "nomatch": true}]
        }]})),
        ExecutionMode::Apply,
    )
    .await
    .unwrap();

    assert!(!outcome.changed);
    assert_eq!(api.write_count(), 0);
}

#[tokio::test]
async fn test_ip_set_entries_created_and_updated() {
    let api = ipset_api();
    let ip_sets = json!([
        {"name": "mgmt", "cidrs": [{"cidr": "10.0.0.0/24", "comment": "lan"}, {"cidr": "10.0.9.9", "nomatch": true}]},
        {"name": "backup", "comment": "pbs", "cidrs": [{"cidr": "10.1.0.5"}]}
    ]);

    let refused = firewall::run(
        &api,
        params(json!({"ip_sets": ip_sets.clone(), "update": false})),
        ExecutionMode::Apply,
    )
    .await;
    assert!(matches!(refused, Err(ReconcileError::Validation(_))));
    assert_eq!(api.write_count(), 0);

    let outcome = firewall::run(&api, params(json!({"ip_sets": ip_sets})), ExecutionMode::Apply)
        .await
        .unwrap();
    assert!(outcome.changed);

    let put = &api.calls_with_method("PUT")[0];
    assert_eq!(put.path, "/cluster/firewall/ipset/mgmt/10.0.0.0%2F24");
    assert_eq!(put.params["comment"], json!("lan"));
    assert_eq!(put.params["nomatch"], json!(0));

    let posts = api.calls_with_method("POST");
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0].path, "/cluster/firewall/ipset");
    assert_eq!(posts[0].params["name"], json!("backup"));
    assert_eq!(posts[0].params["comment"], json!("pbs"));
    assert_eq!(posts[1].path, "/cluster/firewall/ipset/backup");
    assert_eq!(posts[1].params["cidr"], json!("10.1.0.5"));
}

#[tokio::test]
async fn test_ip_set_absent() {
    let api = ipset_api();

    let entry = firewall::run(
        &api,
        params(json!({
            "state": "absent",
            "ip_sets": [{"name": "mgmt", "cidrs": [{"cidr": "10.0.9.9"}, {"cidr": "192.0.2.1"}]}]
        })),
        ExecutionMode::Apply,
    )
    .await
    .unwrap();
    assert!(entry.changed);
    let deletes = api.calls_with_method("DELETE");
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0].path, "/cluster/firewall/ipset/mgmt/10.0.9.9");

    let api = ipset_api();
    firewall::run(
        &api,
        params(json!({"state": "absent", "ip_sets": [{"name": "mgmt"}, {"name": "gone"}]})),
        ExecutionMode::Apply,
    )
    .await
    .unwrap();
    let paths: Vec<String> = api
        .calls_with_method("DELETE")
        .into_iter()
        .map(|call| call.path)
        .collect();
    assert_eq!(
        paths,
        vec![
            "/cluster/firewall/ipset/mgmt/10.0.0.0%2F24",
            "/cluster/firewall/ipset/mgmt/10.0.9.9",
            "/cluster/firewall/ipset/mgmt",
        ]
    );
}

#[tokio::test]
async fn test_firewall_info() {
    let api = ipset_api()
        .with_response("GET", "/nodes/pve1/firewall/rules", json!([{"pos": 0, "action": "ACCEPT", "type": "in"}]))
        .with_response("GET", "/nodes/pve1/firewall/aliases", json!([]))
        .with_response("GET", "/cluster/firewall/groups", json!([{"group": "web"}]));

    let outcome = firewall::info(&api, params(json!({"level": "node", "node": "pve1"})))
        .await
        .unwrap();

    assert!(!outcome.changed);
    assert_eq!(outcome.data["firewall_rules"].as_array().unwrap().len(), 1);
    assert_eq!(outcome.data["groups"], json!(["web"]));
    assert_eq!(outcome.data["ip_sets"][0]["cidrs"][1]["nomatch"], json!(1));
    assert_eq!(api.write_count(), 0);

    let missing = firewall::info(&api, params(json!({"level": "vnet"}))).await;
    assert!(matches!(missing, Err(ReconcileError::MissingParameters { .. })));
}

#[tokio::test]
async fn test_domain_info() {
    let api = MockProxmoxApi::new()
        .with_response("GET", "/access/domains", json!([{"realm": "pam"}, {"realm": "corp"}]))
        .with_response("GET", "/access/domains/corp", json!({"type": "ad", "domain": "corp.example"}));

    let all = domain::info(&api, DomainInfoParams::default()).await.unwrap();
    assert_eq!(all.data["proxmox_domains"].as_array().unwrap().len(), 2);

    let one = domain::info(&api, params(json!({"realm": "corp"}))).await.unwrap();
    assert_eq!(one.data["proxmox_domains"][0]["realm"], json!("corp"));
    assert_eq!(one.data["proxmox_domains"][0]["type"], json!("ad"));

    let unknown = domain::info(&api, params(json!({"name": "ldap0"}))).await;
    assert!(matches!(unknown, Err(ReconcileError::Validation(_))));
}
