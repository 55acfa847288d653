//! Shared wiring for integration tests: every component over one `MockStore`.

#![allow(dead_code)]
#![allow(clippy::expect_used)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use festival_access::biometric::SimilarityMatcher;
use festival_access::config::{
    BiometricConfig, CredentialConfig, KeyConfig, ProximityConfig,
};
use festival_access::environment::SharedClock;
use festival_access::mocks::{FixedClock, MockStore};
use festival_access::state::{
    Beacon, BeaconId, EntryPolicy, Festival, FestivalId, Ticket, TicketId, TicketStatus, UserId,
};
use festival_access::{
    BiometricVerifier, CredentialCodec, CredentialStore, KeyManager, ProximitySessionManager,
    TicketService, TicketValidationEngine,
};
use std::sync::Arc;

pub type Engine = TicketValidationEngine<
    MockStore,
    MockStore,
    MockStore,
    MockStore,
    MockStore,
    MockStore,
    MockStore,
    SimilarityMatcher,
>;

/// Gates open at noon on the festival's first day.
pub fn gates_open() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 7, 10, 12, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub struct Harness {
    pub store: MockStore,
    pub clock: Arc<FixedClock>,
    pub keys: Arc<KeyManager<MockStore>>,
    pub credentials: Arc<CredentialStore<MockStore, MockStore>>,
    pub proximity: Arc<ProximitySessionManager<MockStore, MockStore>>,
    pub biometrics: Arc<BiometricVerifier<MockStore, MockStore, SimilarityMatcher>>,
    pub tickets: TicketService<MockStore, MockStore, MockStore>,
    pub engine: Engine,
    pub festival: Festival,
    pub beacon: Beacon,
}

impl Harness {
    /// Harness whose clock sits one hour after the gates open.
    pub fn new(policy: EntryPolicy) -> Self {
        Self::at(gates_open() + Duration::hours(1), policy)
    }

    pub fn at(now: DateTime<Utc>, policy: EntryPolicy) -> Self {
        let store = MockStore::new();
        let clock = Arc::new(FixedClock::new(now));
        let shared: SharedClock = clock.clone();

        let keys = Arc::new(
            KeyManager::new(
                store.clone(),
                &KeyConfig::with_master_secret("integration-test-master-secret-0123456789"),
                shared.clone(),
            )
            .expect("key manager"),
        );
        let codec = Arc::new(CredentialCodec::new(keys.clone(), shared.clone()));
        let credential_config = CredentialConfig::default();
        let grace = credential_config.rotation_grace_slots;
        let credentials = Arc::new(CredentialStore::new(
            store.clone(),
            codec,
            shared.clone(),
            credential_config,
        ));
        let proximity = Arc::new(ProximitySessionManager::new(
            store.clone(),
            store.clone(),
            shared.clone(),
            ProximityConfig::default(),
        ));
        let biometrics = Arc::new(BiometricVerifier::new(
            store.clone(),
            keys.clone(),
            SimilarityMatcher,
            shared.clone(),
            BiometricConfig::default(),
        ));
        let tickets = TicketService::new(store.clone(), credentials.clone(), grace);
        let engine = TicketValidationEngine::new(
            credentials.clone(),
            store.clone(),
            store.clone(),
            proximity.clone(),
            biometrics.clone(),
            shared,
            grace,
        );

        let festival = Festival {
            festival_id: FestivalId::new(),
            name: "Sommerklang".to_string(),
            starts_at: gates_open(),
            ends_at: gates_open() + Duration::days(3),
            entry_policy: policy,
        };
        store.insert_festival(festival.clone()).expect("festival");

        let beacon = Beacon {
            beacon_id: BeaconId::new(),
            festival_id: festival.festival_id,
            name: "North Gate 2".to_string(),
            min_rssi: -80,
            tx_power: -59,
            is_active: true,
        };
        store.insert_beacon(beacon.clone()).expect("beacon");

        Self {
            store,
            clock,
            keys,
            credentials,
            proximity,
            biometrics,
            tickets,
            engine,
            festival,
            beacon,
        }
    }

    /// Seed an active ticket valid for the whole festival.
    pub fn ticket(&self, holder_name: &str) -> Ticket {
        let ticket = Ticket {
            ticket_id: TicketId::new(),
            user_id: UserId::new(),
            festival_id: self.festival.festival_id,
            template_id: uuid::Uuid::new_v4(),
            holder_name: holder_name.to_string(),
            status: TicketStatus::Active,
            valid_from: self.festival.starts_at,
            valid_to: self.festival.ends_at,
        };
        self.store.insert_ticket(ticket.clone()).expect("ticket");
        ticket
    }

    /// Seed a ticket and issue its credential; returns the public token.
    pub async fn issued(&self, holder_name: &str) -> (Ticket, String) {
        let ticket = self.ticket(holder_name);
        let credential = self
            .tickets
            .issue_credential(ticket.ticket_id)
            .await
            .expect("issue credential");
        (ticket, credential.public_token)
    }
}
