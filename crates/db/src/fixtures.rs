use huddle_core::domain::booking::{Room, RoomId};

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

struct RoomSeed {
    id: i64,
    name: &'static str,
    building: &'static str,
    capacity: u32,
    projector: bool,
    whiteboard: bool,
    video_conference: bool,
    screen: bool,
}

const SEED_ROOMS: &[RoomSeed] = &[
    RoomSeed {
        id: 1,
        name: "Orion",
        building: "Building A",
        capacity: 4,
        projector: false,
        whiteboard: true,
        video_conference: false,
        screen: true,
    },
    RoomSeed {
        id: 2,
        name: "Lyra",
        building: "Building A",
        capacity: 8,
        projector: true,
        whiteboard: true,
        video_conference: true,
        screen: false,
    },
    RoomSeed {
        id: 3,
        name: "Vega",
        building: "Building A",
        capacity: 12,
        projector: true,
        whiteboard: false,
        video_conference: true,
        screen: true,
    },
    RoomSeed {
        id: 4,
        name: "Cygnus",
        building: "Building B",
        capacity: 6,
        projector: false,
        whiteboard: true,
        video_conference: true,
        screen: false,
    },
    RoomSeed {
        id: 5,
        name: "Draco",
        building: "Building B",
        capacity: 20,
        projector: true,
        whiteboard: true,
        video_conference: true,
        screen: true,
    },
    RoomSeed {
        id: 6,
        name: "Pavo",
        building: "Building C",
        capacity: 10,
        projector: true,
        whiteboard: false,
        video_conference: false,
        screen: true,
    },
];

/// Deterministic meeting-room catalogue used by `huddle seed`, the server
/// bootstrap and tests.
pub struct RoomSeedDataset;

impl RoomSeedDataset {
    pub const ROOM_COUNT: usize = SEED_ROOMS.len();

    pub fn rooms() -> Vec<Room> {
        SEED_ROOMS
            .iter()
            .map(|seed| Room {
                id: RoomId(seed.id),
                name: seed.name.to_string(),
                building: seed.building.to_string(),
                capacity: seed.capacity,
                has_projector: seed.projector,
                has_whiteboard: seed.whiteboard,
                has_video_conference: seed.video_conference,
                has_screen: seed.screen,
            })
            .collect()
    }

    /// Inserts missing rooms. Existing rows are left untouched, so the call is idempotent.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        let mut inserted = 0_u64;

        for room in Self::rooms() {
            let result = sqlx::query(
                "INSERT INTO room (id, name, building, capacity, has_projector, has_whiteboard,
                                   has_video_conference, has_screen)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO NOTHING",
            )
            .bind(room.id.0)
            .bind(&room.name)
            .bind(&room.building)
            .bind(i64::from(room.capacity))
            .bind(room.has_projector)
            .bind(room.has_whiteboard)
            .bind(room.has_video_conference)
            .bind(room.has_screen)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;

        tracing::info!(
            event_name = "db.seed.rooms",
            rooms_total = Self::ROOM_COUNT,
            rooms_inserted = inserted,
            "room fixtures loaded"
        );

        Ok(SeedResult {
            rooms_seeded: SEED_ROOMS.iter().map(|seed| (seed.id, seed.name)).collect(),
            rooms_inserted: inserted,
        })
    }

    /// Checks every seeded room exists with its seeded name.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::with_capacity(SEED_ROOMS.len());

        for seed in SEED_ROOMS {
            let present = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM room WHERE id = ? AND name = ?",
            )
            .bind(seed.id)
            .bind(seed.name)
            .fetch_one(pool)
            .await?;
            checks.push((seed.name, present == 1));
        }

        let all_present = checks.iter().all(|(_, exists)| *exists);
        Ok(VerificationResult { all_present, checks })
    }
}

#[derive(Debug)]
pub struct SeedResult {
    pub rooms_seeded: Vec<(i64, &'static str)>,
    pub rooms_inserted: u64,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
