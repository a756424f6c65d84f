use plantlink_network::*;
use plantlink_protocol::{AgentId, PLANT_CONNECTION_CAPABILITY};

#[test]
fn test_find_in_registration_order() {
    let dir = LocalDirectory::new();
    for name in ["c-1", "c-2", "c-3"] {
        dir.register(&AgentId::from(name), PLANT_CONNECTION_CAPABILITY).unwrap();
    }
    dir.register(&AgentId::from("other"), "historian").unwrap();

    let found = dir.find(PLANT_CONNECTION_CAPABILITY).unwrap();
    assert_eq!(
        found,
        vec![AgentId::from("c-1"), AgentId::from("c-2"), AgentId::from("c-3")]
    );
}

#[test]
fn test_deregister_removes_agent() {
    let dir = LocalDirectory::new();
    let id = AgentId::from("c-1");
    dir.register(&id, PLANT_CONNECTION_CAPABILITY).unwrap();
    dir.register(&id, PLANT_CONNECTION_CAPABILITY).unwrap();
    assert_eq!(dir.len(), 1);

    dir.deregister(&id).unwrap();
    assert!(dir.find(PLANT_CONNECTION_CAPABILITY).unwrap().is_empty());
    // Unknown agents are fine.
    dir.deregister(&id).unwrap();
}

#[test]
fn test_static_directory_answers_single_capability() {
    let dir = StaticDirectory::new(
        PLANT_CONNECTION_CAPABILITY,
        vec![AgentId::from("a"), AgentId::from("b")],
    );
    assert_eq!(dir.find(PLANT_CONNECTION_CAPABILITY).unwrap().len(), 2);
    assert!(dir.find("historian").unwrap().is_empty());
}
