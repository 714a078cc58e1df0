//! The candidate router: validates inbound feed records,
//! classifies them trusted vs. needs-geocoding, fans out geocoder
//! tasks, and registers every entity in the transfer table.
//!
//! Ported from `examples/original_source/src/router/consumer.py`
//! (`process_candidate`, the trusted/untrusted branch) and
//! `.../router/entity.py` (the `trivago` row construction, `guess`
//! assembly).

use crate::consolidator::trusted_winner;
use crate::country_mapper::CountryMapper;
use crate::decimal::Decimal;
use crate::messages::{GeocoderTaskMessage, SourceFeedRecord};
use crate::model::{provider, Address, Candidate, EntityKey, EntityType, Guess};
use crate::store::CandidateStore;
use crate::transfer_table::{TransferRecord, TransferTable};

/// Everything a single source-feed record produced: whatever candidate
/// rows were written to the store (already applied by `route`) and the
/// geocoder tasks a queue worker must still enqueue.
pub struct RouteOutcome {
    pub geocoder_tasks: Vec<GeocoderTaskMessage>,
}

/// Process one source-feed record end to end: normalize, register with
/// the transfer table, then either accept a trusted coordinate or fan
/// out geocoder tasks.
/// `store` receives the `trivago` row (untrusted path) or the
/// immediate winner row (trusted path); the caller owns actually
/// putting the returned tasks on a queue.
pub async fn route(
    record: &SourceFeedRecord,
    environment: &str,
    country_mapper: &CountryMapper,
    transfer_table: &TransferTable,
    store: &dyn CandidateStore,
) -> anyhow::Result<RouteOutcome> {
    let entity = EntityKey::new(EntityType::CandidateAccommodation, record.candidate_id);
    let country_code = country_mapper.normalize(record.country.as_deref(), record.country.as_deref());

    transfer_table.register(
        &entity,
        TransferRecord {
            city: record.city.clone(),
            country_code: country_code.clone(),
            batch_id: None,
        },
    );

    if record.is_valid_geocode {
        let (Some(longitude), Some(latitude)) = (record.longitude, record.latitude) else {
            // A trusted row with no coordinate to trust is a
            // contradiction the feed shouldn't produce; treat it as
            // untrusted rather than writing a coordinate-less winner.
            return route_untrusted(record, &entity, country_code, store).await;
        };
        let mut winner = trusted_winner(
            &entity,
            Decimal::from_f64(longitude),
            Decimal::from_f64(latitude),
            record.city.clone(),
            country_code,
        );
        winner.provider = provider::consolidated(environment);
        store.upsert(winner).await?;
        return Ok(RouteOutcome {
            geocoder_tasks: Vec::new(),
        });
    }

    route_untrusted(record, &entity, country_code, store).await
}

async fn route_untrusted(
    record: &SourceFeedRecord,
    entity: &EntityKey,
    country_code: Option<String>,
    store: &dyn CandidateStore,
) -> anyhow::Result<RouteOutcome> {
    let guess = match (record.longitude, record.latitude) {
        (Some(longitude), Some(latitude)) => Some(Guess { longitude, latitude }),
        _ => None,
    };

    let address = Address {
        street: record.street.clone(),
        house_number: None,
        name: record.name.clone(),
        district: record.district.clone(),
        city: record.city.clone(),
        region: record.region.clone(),
        postal_code: record.postal_code.clone(),
        country: record.country.clone(),
        country_code: country_code.clone(),
        guess,
    };

    // A trivago row carries the feed's own verbatim guess; with no
    // guess there's nothing to stash.
    if let Some(guess) = guess {
        let trivago_row = Candidate {
            entity_type: entity.entity_type,
            entity_id: entity.entity_id,
            provider: provider::TRIVAGO.to_owned(),
            longitude: Some(Decimal::from_f64(guess.longitude)),
            latitude: Some(Decimal::from_f64(guess.latitude)),
            accuracy: None,
            confidence: None,
            quality: None,
            score: None,
            city: record.city.clone(),
            country_code: country_code.clone(),
            meta: {
                let mut meta = serde_json::Map::new();
                meta.insert(
                    "address_out".to_owned(),
                    serde_json::to_value(&address).unwrap_or(serde_json::Value::Null),
                );
                meta
            },
            batch_id: None,
            timestamp: None,
        };
        store.upsert(trivago_row).await?;
    }

    let geocoder_tasks = provider::DEFAULT_GEOCODER_PROVIDERS
        .iter()
        .map(|provider_name| GeocoderTaskMessage {
            provider: (*provider_name).to_owned(),
            entity_id: entity.entity_id,
            entity_type: entity.entity_type,
            batch_id: None,
            address: address.clone(),
        })
        .collect();

    Ok(RouteOutcome { geocoder_tasks })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::country_mapper::CountryCodeRow;
    use crate::store::InMemoryCandidateStore;

    fn mapper() -> CountryMapper {
        CountryMapper::new(vec![CountryCodeRow {
            name: "United Kingdom".to_owned(),
            iso_3166_2: "GB".to_owned(),
            iso_3166_3: "GBR".to_owned(),
            destination_id: None,
        }])
    }

    #[tokio::test]
    async fn trusted_record_writes_one_winner_and_emits_no_tasks() {
        let store = InMemoryCandidateStore::new();
        let transfer_table = TransferTable::default();
        let mapper = mapper();
        let record = SourceFeedRecord {
            candidate_id: 1,
            city: Some("London".to_owned()),
            country: Some("GB".to_owned()),
            longitude: Some(0.1),
            latitude: Some(0.2),
            is_valid_geocode: true,
            ..Default::default()
        };

        let outcome = route(&record, "test", &mapper, &transfer_table, &store)
            .await
            .unwrap();
        assert!(outcome.geocoder_tasks.is_empty());

        let entity = EntityKey::new(EntityType::CandidateAccommodation, 1);
        let rows = store.get_all_by_entity(&entity).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].provider, "consolidated_test");
        assert_eq!(rows[0].score, Some(1.0));
    }

    #[tokio::test]
    async fn untrusted_record_emits_default_provider_tasks_and_trivago_row() {
        let store = InMemoryCandidateStore::new();
        let transfer_table = TransferTable::default();
        let mapper = mapper();
        let record = SourceFeedRecord {
            candidate_id: 2,
            city: Some("London".to_owned()),
            country: Some("GB".to_owned()),
            longitude: Some(0.1),
            latitude: Some(0.2),
            is_valid_geocode: false,
            ..Default::default()
        };

        let outcome = route(&record, "test", &mapper, &transfer_table, &store)
            .await
            .unwrap();
        assert_eq!(
            outcome.geocoder_tasks.len(),
            provider::DEFAULT_GEOCODER_PROVIDERS.len()
        );

        let entity = EntityKey::new(EntityType::CandidateAccommodation, 2);
        let rows = store.get_all_by_entity(&entity).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].provider, "trivago");
        assert!(transfer_table.contains(&entity));
    }

    #[tokio::test]
    async fn untrusted_record_with_no_guess_writes_no_trivago_row() {
        let store = InMemoryCandidateStore::new();
        let transfer_table = TransferTable::default();
        let mapper = mapper();
        let record = SourceFeedRecord {
            candidate_id: 3,
            city: Some("London".to_owned()),
            country: Some("GB".to_owned()),
            longitude: None,
            latitude: None,
            is_valid_geocode: false,
            ..Default::default()
        };

        let outcome = route(&record, "test", &mapper, &transfer_table, &store)
            .await
            .unwrap();
        assert_eq!(
            outcome.geocoder_tasks.len(),
            provider::DEFAULT_GEOCODER_PROVIDERS.len()
        );

        let entity = EntityKey::new(EntityType::CandidateAccommodation, 3);
        let rows = store.get_all_by_entity(&entity).await.unwrap();
        assert!(rows.is_empty());
    }
}
