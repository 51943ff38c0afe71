use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use huddle_core::checkpoint::{CheckpointError, CheckpointRecord, CheckpointStore};
use huddle_core::domain::booking::{
    BookingStore, BookingStoreError, NewReservation, Reservation, ReservationId,
    ReservationStatus, Room, RoomId,
};
use huddle_core::domain::conversation::ConversationState;
use huddle_core::domain::session::SessionKey;

#[derive(Default)]
pub struct InMemoryCheckpointStore {
    records: RwLock<HashMap<SessionKey, Vec<CheckpointRecord>>>,
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, key: &SessionKey) -> Result<Option<CheckpointRecord>, CheckpointError> {
        let records = self.records.read().await;
        Ok(records.get(key).and_then(|history| history.last().cloned()))
    }

    async fn save(
        &self,
        key: &SessionKey,
        state: &ConversationState,
        expected_version: u64,
    ) -> Result<CheckpointRecord, CheckpointError> {
        let mut records = self.records.write().await;
        let history = records.entry(key.clone()).or_default();
        let latest = history.last().map(|record| record.version).unwrap_or(0);

        if latest != expected_version {
            return Err(CheckpointError::Conflict {
                session_key: key.to_string(),
                expected: expected_version,
                actual: latest,
            });
        }

        let record = CheckpointRecord {
            session_key: key.clone(),
            version: latest + 1,
            state: state.clone(),
            created_at: Utc::now(),
        };
        history.push(record.clone());
        Ok(record)
    }

    async fn history(&self, key: &SessionKey) -> Result<Vec<CheckpointRecord>, CheckpointError> {
        let records = self.records.read().await;
        Ok(records.get(key).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
pub struct InMemoryBookingStore {
    rooms: RwLock<Vec<Room>>,
    reservations: RwLock<Vec<Reservation>>,
}

impl InMemoryBookingStore {
    pub fn with_rooms(rooms: Vec<Room>) -> Self {
        Self { rooms: RwLock::new(rooms), reservations: RwLock::new(Vec::new()) }
    }

    pub async fn reservations(&self) -> Vec<Reservation> {
        self.reservations.read().await.clone()
    }
}

#[async_trait]
impl BookingStore for InMemoryBookingStore {
    async fn list_rooms(&self) -> Result<Vec<Room>, BookingStoreError> {
        Ok(self.rooms.read().await.clone())
    }

    async fn find_room(&self, id: RoomId) -> Result<Option<Room>, BookingStoreError> {
        Ok(self.rooms.read().await.iter().find(|room| room.id == id).cloned())
    }

    async fn reservations_for_room(
        &self,
        room_id: RoomId,
    ) -> Result<Vec<Reservation>, BookingStoreError> {
        let reservations = self.reservations.read().await;
        Ok(reservations.iter().filter(|r| r.room_id == room_id).cloned().collect())
    }

    async fn reservations_for_organizer(
        &self,
        organizer_id: i64,
    ) -> Result<Vec<Reservation>, BookingStoreError> {
        let reservations = self.reservations.read().await;
        let mut owned: Vec<Reservation> =
            reservations.iter().filter(|r| r.organizer_id == organizer_id).cloned().collect();
        owned.sort_by_key(|r| r.start);
        Ok(owned)
    }

    async fn find_reservation(
        &self,
        id: ReservationId,
    ) -> Result<Option<Reservation>, BookingStoreError> {
        Ok(self.reservations.read().await.iter().find(|r| r.id == id).cloned())
    }

    async fn insert_reservation(
        &self,
        reservation: NewReservation,
    ) -> Result<Reservation, BookingStoreError> {
        let mut reservations = self.reservations.write().await;
        if reservations.iter().any(|existing| {
            existing.room_id == reservation.room_id
                && existing.is_active()
                && existing.range().overlaps(&reservation.range)
        }) {
            return Err(BookingStoreError::SlotTaken { room_id: reservation.room_id.0 });
        }
        let next_id = reservations.iter().map(|r| r.id.0).max().unwrap_or(0) + 1;
        let created = Reservation {
            id: ReservationId(next_id),
            room_id: reservation.room_id,
            organizer_id: reservation.organizer_id,
            title: reservation.title,
            start: reservation.range.start,
            end: reservation.range.end,
            status: ReservationStatus::Confirmed,
            created_at: Utc::now(),
        };
        reservations.push(created.clone());
        Ok(created)
    }

    async fn update_reservation_status(
        &self,
        id: ReservationId,
        status: ReservationStatus,
    ) -> Result<bool, BookingStoreError> {
        let mut reservations = self.reservations.write().await;
        match reservations.iter_mut().find(|r| r.id == id) {
            Some(reservation) => {
                reservation.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
