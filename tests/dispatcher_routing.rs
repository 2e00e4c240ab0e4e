// ==============================================
// DISPATCHER / AGGREGATOR ROUTING TESTS (integration)
// ==============================================
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use flywheel::error::Error;
use flywheel::prelude::*;
use flywheel::testing::MockBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Entity {
    User,
    Group,
    Tenant,
}

fn labelled(prefix: &'static str) -> MockBackend<u64, String> {
    MockBackend::new((0..10).map(move |i| (i, format!("{prefix}-{i}"))))
}

#[test]
fn each_type_flushes_on_its_own() {
    let users = labelled("user");
    let groups = labelled("group");
    let dispatcher: Dispatcher<Entity, u64, String> = Dispatcher::new();
    dispatcher.register_provider(Entity::User, Provider::new(users.clone()));
    dispatcher.register_provider(Entity::Group, Provider::new(groups.clone()));

    let added = dispatcher
        .add_many([
            (Entity::User, 1),
            (Entity::Group, 1),
            (Entity::User, 2),
            (Entity::Group, 5),
        ])
        .unwrap();
    assert_eq!(added, 4);

    let user_page = dispatcher.container_for(&Entity::User).unwrap();
    let rendered: Vec<String> = user_page.iter().map(|v| v.unwrap().to_string()).collect();
    assert_eq!(rendered, ["user-1", "user-2"]);
    assert_eq!(users.calls(), vec![vec![1, 2]]);
    assert_eq!(groups.call_count(), 0);

    assert_eq!(dispatcher.get(&Entity::Group, &5).unwrap().as_str(), "group-5");
    assert_eq!(groups.calls(), vec![vec![1, 5]]);
}

#[test]
fn unknown_type_surfaces_as_error() {
    let dispatcher: Dispatcher<Entity, u64, String> = Dispatcher::new();
    dispatcher.register_provider(Entity::User, Provider::new(labelled("user")));

    let err = dispatcher.add(Entity::Tenant, 1).unwrap_err();
    assert!(matches!(err, Error::UnknownType { .. }));
    assert!(err.to_string().contains("Tenant"));
}

#[test]
fn factory_providers_are_created_once_across_threads() {
    let backends: Arc<parking_lot::Mutex<Vec<MockBackend<u64, String>>>> = Arc::default();
    let created = Arc::clone(&backends);
    let dispatcher: Arc<Dispatcher<Entity, u64, String>> =
        Arc::new(Dispatcher::with_factory(move |entity| {
            let backend = labelled(match entity {
                Entity::User => "user",
                Entity::Group => "group",
                Entity::Tenant => return None,
            });
            created.lock().push(backend.clone());
            Some(Provider::new(backend))
        }));

    let handles: Vec<_> = (0..8u64)
        .map(|i| {
            let dispatcher = Arc::clone(&dispatcher);
            thread::spawn(move || dispatcher.add(Entity::User, i).unwrap())
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(backends.lock().len(), 1);
    assert_eq!(dispatcher.container_for(&Entity::User).unwrap().len(), 8);
    assert!(dispatcher.provider(&Entity::Tenant).is_err());
}

#[test]
fn aggregator_combines_routes() {
    let primary = Provider::from_fn(|ids: &[u64]| {
        Ok(ids.iter().filter(|id| **id % 2 == 0).map(|id| (*id, *id)).collect::<HashMap<_, _>>())
    });
    let replica = Provider::from_fn(|ids: &[u64]| {
        Ok(ids.iter().map(|id| (*id, *id * 10)).collect::<HashMap<_, _>>())
    });
    let aggregator = Aggregator::new(|_: &u64, parts: &[(&'static str, Arc<u64>)]| {
        parts.iter().map(|(route, value)| format!("{route}={value}")).collect::<Vec<_>>().join(",")
    })
    .with_provider("primary", primary.clone())
    .with_provider("replica", replica);

    aggregator.register([1, 2]);
    assert_eq!(primary.pending_len(), 2);
    assert_eq!(aggregator.get(&2).unwrap(), "primary=2,replica=20");
    assert_eq!(aggregator.get(&1).unwrap(), "replica=10");
}
