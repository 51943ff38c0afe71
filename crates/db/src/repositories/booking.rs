use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use huddle_core::domain::booking::{
    format_meeting_time, BookingStore, BookingStoreError, NewReservation, Reservation,
    ReservationId, ReservationStatus, Room, RoomId, MEETING_TIME_FORMAT,
};

use super::checkpoint::parse_timestamp;
use super::RepositoryError;
use crate::DbPool;

const RESERVATION_COLUMNS: &str =
    "id, room_id, organizer_id, title, start_time, end_time, status, created_at";

pub struct SqlBookingStore {
    pool: DbPool,
}

impl SqlBookingStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BookingStore for SqlBookingStore {
    async fn list_rooms(&self) -> Result<Vec<Room>, BookingStoreError> {
        let rows = sqlx::query(
            "SELECT id, name, building, capacity, has_projector, has_whiteboard,
                    has_video_conference, has_screen
             FROM room
             ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.into_iter().map(room_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    async fn find_room(&self, id: RoomId) -> Result<Option<Room>, BookingStoreError> {
        let row = sqlx::query(
            "SELECT id, name, building, capacity, has_projector, has_whiteboard,
                    has_video_conference, has_screen
             FROM room
             WHERE id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.map(room_from_row).transpose()?)
    }

    async fn reservations_for_room(
        &self,
        room_id: RoomId,
    ) -> Result<Vec<Reservation>, BookingStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservation WHERE room_id = ? ORDER BY start_time ASC"
        ))
        .bind(room_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.into_iter().map(reservation_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    async fn reservations_for_organizer(
        &self,
        organizer_id: i64,
    ) -> Result<Vec<Reservation>, BookingStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservation WHERE organizer_id = ? ORDER BY start_time ASC"
        ))
        .bind(organizer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.into_iter().map(reservation_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    async fn find_reservation(
        &self,
        id: ReservationId,
    ) -> Result<Option<Reservation>, BookingStoreError> {
        let row = sqlx::query(&format!("SELECT {RESERVATION_COLUMNS} FROM reservation WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        Ok(row.map(reservation_from_row).transpose()?)
    }

    async fn insert_reservation(
        &self,
        reservation: NewReservation,
    ) -> Result<Reservation, BookingStoreError> {
        let created_at = Utc::now();
        let start = format_meeting_time(&reservation.range.start);
        let end = format_meeting_time(&reservation.range.end);
        // Single statement, so the overlap check and the insert cannot interleave
        // with another booking of the same room.
        let result = sqlx::query(
            "INSERT INTO reservation (room_id, organizer_id, title, start_time, end_time, status, created_at)
             SELECT ?, ?, ?, ?, ?, ?, ?
             WHERE NOT EXISTS (
                 SELECT 1 FROM reservation
                 WHERE room_id = ? AND status = ? AND start_time < ? AND end_time > ?
             )",
        )
        .bind(reservation.room_id.0)
        .bind(reservation.organizer_id)
        .bind(&reservation.title)
        .bind(&start)
        .bind(&end)
        .bind(ReservationStatus::Confirmed.as_str())
        .bind(created_at.to_rfc3339())
        .bind(reservation.room_id.0)
        .bind(ReservationStatus::Confirmed.as_str())
        .bind(&end)
        .bind(&start)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        if result.rows_affected() == 0 {
            return Err(BookingStoreError::SlotTaken { room_id: reservation.room_id.0 });
        }

        Ok(Reservation {
            id: ReservationId(result.last_insert_rowid()),
            room_id: reservation.room_id,
            organizer_id: reservation.organizer_id,
            title: reservation.title,
            start: reservation.range.start,
            end: reservation.range.end,
            status: ReservationStatus::Confirmed,
            created_at,
        })
    }

    async fn update_reservation_status(
        &self,
        id: ReservationId,
        status: ReservationStatus,
    ) -> Result<bool, BookingStoreError> {
        let result = sqlx::query("UPDATE reservation SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        Ok(result.rows_affected() > 0)
    }
}

fn room_from_row(row: SqliteRow) -> Result<Room, RepositoryError> {
    let capacity: i64 = row.try_get("capacity")?;
    Ok(Room {
        id: RoomId(row.try_get("id")?),
        name: row.try_get("name")?,
        building: row.try_get("building")?,
        capacity: u32::try_from(capacity).map_err(|_| {
            RepositoryError::Decode(format!("invalid value for `capacity`: {capacity}"))
        })?,
        has_projector: row.try_get("has_projector")?,
        has_whiteboard: row.try_get("has_whiteboard")?,
        has_video_conference: row.try_get("has_video_conference")?,
        has_screen: row.try_get("has_screen")?,
    })
}

fn reservation_from_row(row: SqliteRow) -> Result<Reservation, RepositoryError> {
    let status: String = row.try_get("status")?;
    Ok(Reservation {
        id: ReservationId(row.try_get("id")?),
        room_id: RoomId(row.try_get("room_id")?),
        organizer_id: row.try_get("organizer_id")?,
        title: row.try_get("title")?,
        start: parse_meeting_column("start_time", row.try_get("start_time")?)?,
        end: parse_meeting_column("end_time", row.try_get("end_time")?)?,
        status: ReservationStatus::parse(&status).ok_or_else(|| {
            RepositoryError::Decode(format!("invalid reservation status `{status}`"))
        })?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn parse_meeting_column(column: &str, value: String) -> Result<NaiveDateTime, RepositoryError> {
    NaiveDateTime::parse_from_str(&value, MEETING_TIME_FORMAT).map_err(|error| {
        RepositoryError::Decode(format!("invalid meeting time in `{column}`: `{value}` ({error})"))
    })
}

#[cfg(test)]
mod tests {
    use huddle_core::domain::booking::{
        parse_meeting_time, BookingStore, BookingStoreError, NewReservation, ReservationId,
        ReservationStatus, RoomId, TimeRange,
    };

    use super::SqlBookingStore;
    use crate::fixtures::RoomSeedDataset;
    use crate::migrations;
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30)
            .await
            .expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        RoomSeedDataset::load(&pool).await.expect("seed rooms");
        pool
    }

    fn range(start: &str, end: &str) -> TimeRange {
        TimeRange::new(
            parse_meeting_time(start).expect("start"),
            parse_meeting_time(end).expect("end"),
        )
        .expect("range")
    }

    #[tokio::test]
    async fn seeded_rooms_are_listed_in_id_order() {
        let store = SqlBookingStore::new(setup_pool().await);
        let rooms = store.list_rooms().await.expect("list rooms");

        assert_eq!(rooms.len(), RoomSeedDataset::ROOM_COUNT);
        assert!(rooms.windows(2).all(|pair| pair[0].id < pair[1].id));
        assert!(store.find_room(RoomId(1)).await.expect("find").is_some());
        assert!(store.find_room(RoomId(999)).await.expect("find").is_none());
    }

    #[tokio::test]
    async fn reservation_insert_and_cancel_round_trip() {
        let store = SqlBookingStore::new(setup_pool().await);
        let created = store
            .insert_reservation(NewReservation {
                room_id: RoomId(2),
                organizer_id: 42,
                title: "design review".to_string(),
                range: range("2026-10-20 09:00:00", "2026-10-20 10:30:00"),
            })
            .await
            .expect("insert");

        let found = store.find_reservation(created.id).await.expect("find").expect("row");
        assert_eq!(found.title, "design review");
        assert_eq!(found.range().duration_minutes(), 90);
        assert!(found.is_active());

        let by_room = store.reservations_for_room(RoomId(2)).await.expect("by room");
        assert_eq!(by_room.len(), 1);
        let by_organizer = store.reservations_for_organizer(42).await.expect("by organizer");
        assert_eq!(by_organizer, by_room);

        let updated = store
            .update_reservation_status(created.id, ReservationStatus::Cancelled)
            .await
            .expect("cancel");
        assert!(updated);
        let cancelled = store.find_reservation(created.id).await.expect("find").expect("row");
        assert_eq!(cancelled.status, ReservationStatus::Cancelled);

        let missing = store
            .update_reservation_status(ReservationId(404), ReservationStatus::Cancelled)
            .await
            .expect("cancel missing");
        assert!(!missing);
    }

    #[tokio::test]
    async fn overlapping_insert_is_refused_until_the_slot_is_freed() {
        let store = SqlBookingStore::new(setup_pool().await);
        let booking = |title: &str, start: &str, end: &str| NewReservation {
            room_id: RoomId(3),
            organizer_id: 42,
            title: title.to_string(),
            range: range(start, end),
        };

        let first = store
            .insert_reservation(booking("standup", "2026-10-20 09:00:00", "2026-10-20 10:00:00"))
            .await
            .expect("first booking");

        let clash = store
            .insert_reservation(booking("retro", "2026-10-20 09:30:00", "2026-10-20 10:30:00"))
            .await
            .expect_err("overlapping booking");
        assert!(matches!(clash, BookingStoreError::SlotTaken { room_id: 3 }));

        store
            .insert_reservation(booking("retro", "2026-10-20 10:00:00", "2026-10-20 11:00:00"))
            .await
            .expect("back-to-back booking");

        store
            .update_reservation_status(first.id, ReservationStatus::Cancelled)
            .await
            .expect("cancel");
        store
            .insert_reservation(booking("retro", "2026-10-20 09:15:00", "2026-10-20 09:45:00"))
            .await
            .expect("slot freed by cancellation");
        assert_eq!(store.reservations_for_room(RoomId(3)).await.expect("by room").len(), 3);
    }
}
