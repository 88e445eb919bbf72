//! Property-based tests over the object model.

use ferrydb_client::MutableDocument;
use ferrydb_testkit::prelude::*;
use proptest::prelude::*;

proptest! {
    /// Any body built from the boundary's JSON contract survives a
    /// save/get round trip unchanged.
    #[test]
    fn bodies_round_trip_through_save_and_get(
        id in doc_id_strategy(),
        body in document_body_strategy(),
    ) {
        with_memory_db(|db| {
            let doc = MutableDocument::with_id(db, &id).unwrap();
            doc.set_value(&body).unwrap();
            prop_assert!(db.save_document(&doc).unwrap());

            let fetched = db.get_document(&id).unwrap().unwrap();
            prop_assert_eq!(fetched.to_value().unwrap(), body);
            Ok(())
        })?;
    }

    /// Re-saving under the same id always leaves the second body.
    #[test]
    fn overwrite_keeps_the_last_body(
        id in doc_id_strategy(),
        first in document_body_strategy(),
        second in document_body_strategy(),
    ) {
        with_memory_db(|db| {
            save_json(db, &id, &first);
            save_json(db, &id, &second);
            prop_assert_eq!(read_json(db, &id), Some(second));
            Ok(())
        })?;
    }

    /// Query parameter sets round-trip as whole JSON objects.
    #[test]
    fn parameters_round_trip(parameters in parameters_strategy()) {
        with_memory_db(|db| {
            let query = db
                .create_query(ferrydb_client::QueryLanguage::Json, "{}")
                .unwrap();
            query.set_parameters(&parameters.to_string()).unwrap();
            let read: serde_json::Value =
                serde_json::from_str(&query.parameters().unwrap()).unwrap();
            prop_assert_eq!(read, parameters);
            Ok(())
        })?;
    }
}
