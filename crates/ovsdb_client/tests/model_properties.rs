//! Property tests for model mapping through the cache.

use ovsdb_client::TableCache;
use ovsdb_protocol::{
    MonitorRequest, MonitorRequests, RowUpdate2, TableUpdate2, TableUpdates2, Value, UUID_COLUMN,
};
use ovsdb_testkit::prelude::*;
use proptest::prelude::*;
use std::sync::Arc;

fn cache() -> (TableCache, MonitorRequests) {
    let model = Arc::new(ovslite_model());
    let requests = model
        .schema()
        .tables()
        .map(|table| (table.name.clone(), MonitorRequest::all_columns(table)))
        .collect();
    (TableCache::new(model, 16), requests)
}

proptest! {
    #[test]
    fn bridge_models_survive_the_cache(bridge in bridge_model_strategy()) {
        let (cache, requests) = cache();
        let model = ovslite_model();
        let mapper = model.mapper::<BridgeModel>().unwrap();

        let row = mapper.model_to_row(&bridge, None).unwrap();
        prop_assert!(row.get(UUID_COLUMN).is_none());

        let updates = TableUpdates2::new().with_table(
            "Bridge",
            TableUpdate2::new().with_row(bridge.uuid.clone(), RowUpdate2::insert(row)),
        );
        let summary = cache.apply(&requests, updates);
        prop_assert_eq!(summary.added, 1);

        let cached = cache.get_model::<BridgeModel>(&bridge.uuid).unwrap();
        prop_assert_eq!(cached, Some(bridge));
    }

    #[test]
    fn ovs_models_survive_the_cache(ovs in ovs_model_strategy()) {
        let (cache, requests) = cache();
        let model = ovslite_model();
        let row = model.mapper::<OvsModel>().unwrap().model_to_row(&ovs, None).unwrap();

        let updates = TableUpdates2::new().with_table(
            "Open_vSwitch",
            TableUpdate2::new().with_row(ovs.uuid.clone(), RowUpdate2::initial(row)),
        );
        cache.apply(&requests, updates);

        let listed = cache.list_models::<OvsModel>().unwrap();
        prop_assert_eq!(listed, vec![ovs.clone()]);
        let cached = cache.get("Open_vSwitch", &ovs.uuid).unwrap();
        prop_assert_eq!(cached.row().get(UUID_COLUMN), Some(&Value::uuid(ovs.uuid.clone())));
    }
}
