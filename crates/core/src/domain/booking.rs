use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MEETING_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoomId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReservationId(pub i64);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub building: String,
    pub capacity: u32,
    pub has_projector: bool,
    pub has_whiteboard: bool,
    pub has_video_conference: bool,
    pub has_screen: bool,
}

impl Room {
    pub fn has(&self, equipment: Equipment) -> bool {
        match equipment {
            Equipment::Projector => self.has_projector,
            Equipment::Whiteboard => self.has_whiteboard,
            Equipment::VideoConference => self.has_video_conference,
            Equipment::Screen => self.has_screen,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Equipment {
    Projector,
    Whiteboard,
    VideoConference,
    Screen,
}

impl Equipment {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "projector" | "投影仪" => Some(Self::Projector),
            "whiteboard" | "白板" => Some(Self::Whiteboard),
            "video_conference" | "video" | "phone" | "视频会议" => Some(Self::VideoConference),
            "screen" | "display" | "显示屏" => Some(Self::Screen),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Confirmed,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "confirmed" => Some(Self::Confirmed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeRange {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Option<Self> {
        (end > start).then_some(Self { start, end })
    }

    /// Half-open overlap: back-to-back meetings do not conflict.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub room_id: RoomId,
    pub organizer_id: i64,
    pub title: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
}

impl Reservation {
    pub fn range(&self) -> TimeRange {
        TimeRange { start: self.start, end: self.end }
    }

    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Confirmed
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewReservation {
    pub room_id: RoomId,
    pub organizer_id: i64,
    pub title: String,
    pub range: TimeRange,
}

/// Filter used by room recommendation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoomQuery {
    pub range: TimeRange,
    pub capacity: u32,
    pub equipment: Vec<Equipment>,
    pub preferred_locations: Vec<String>,
}

impl RoomQuery {
    /// Static suitability only; availability is checked against reservations separately.
    pub fn admits(&self, room: &Room) -> bool {
        if room.capacity < self.capacity {
            return false;
        }
        if !self.equipment.iter().all(|equipment| room.has(*equipment)) {
            return false;
        }
        self.preferred_locations.is_empty()
            || self.preferred_locations.iter().any(|location| room.building.contains(location.as_str()))
    }
}

pub fn parse_meeting_time(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    NaiveDateTime::parse_from_str(value, MEETING_TIME_FORMAT)
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M").ok())
        .or_else(|| DateTime::parse_from_rfc3339(value).ok().map(|dt| dt.naive_local()))
}

pub fn format_meeting_time(value: &NaiveDateTime) -> String {
    value.format(MEETING_TIME_FORMAT).to_string()
}

#[derive(Debug, Error)]
pub enum BookingStoreError {
    #[error("booking store unavailable: {0}")]
    Unavailable(String),
    #[error("booking record could not be decoded: {0}")]
    Decode(String),
    #[error("room {room_id} already has an active booking overlapping that slot")]
    SlotTaken { room_id: i64 },
}

/// Booking data the room actions read and write. Treated as an opaque external store.
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn list_rooms(&self) -> Result<Vec<Room>, BookingStoreError>;
    async fn find_room(&self, id: RoomId) -> Result<Option<Room>, BookingStoreError>;
    async fn reservations_for_room(
        &self,
        room_id: RoomId,
    ) -> Result<Vec<Reservation>, BookingStoreError>;
    async fn reservations_for_organizer(
        &self,
        organizer_id: i64,
    ) -> Result<Vec<Reservation>, BookingStoreError>;
    async fn find_reservation(
        &self,
        id: ReservationId,
    ) -> Result<Option<Reservation>, BookingStoreError>;
    /// Fails with `SlotTaken` when an active reservation of the same room
    /// overlaps, checked atomically with the insert.
    async fn insert_reservation(
        &self,
        reservation: NewReservation,
    ) -> Result<Reservation, BookingStoreError>;
    async fn update_reservation_status(
        &self,
        id: ReservationId,
        status: ReservationStatus,
    ) -> Result<bool, BookingStoreError>;
}

#[cfg(test)]
mod tests {
    use super::{parse_meeting_time, Equipment, Room, RoomId, RoomQuery, TimeRange};

    fn range(start: &str, end: &str) -> TimeRange {
        TimeRange::new(
            parse_meeting_time(start).expect("start"),
            parse_meeting_time(end).expect("end"),
        )
        .expect("valid range")
    }

    fn room() -> Room {
        Room {
            id: RoomId(4),
            name: "Orion".to_string(),
            building: "Building A".to_string(),
            capacity: 8,
            has_projector: true,
            has_whiteboard: false,
            has_video_conference: true,
            has_screen: false,
        }
    }

    #[test]
    fn back_to_back_ranges_do_not_overlap() {
        let morning = range("2026-10-20 09:00:00", "2026-10-20 10:00:00");
        let next = range("2026-10-20 10:00:00", "2026-10-20 11:00:00");
        let straddling = range("2026-10-20 09:30:00", "2026-10-20 10:30:00");

        assert!(!morning.overlaps(&next));
        assert!(morning.overlaps(&straddling));
        assert!(next.overlaps(&straddling));
        assert_eq!(morning.duration_minutes(), 60);
    }

    #[test]
    fn inverted_range_is_rejected() {
        let start = parse_meeting_time("2026-10-20 10:00:00").expect("start");
        let end = parse_meeting_time("2026-10-20 09:00:00").expect("end");
        assert!(TimeRange::new(start, end).is_none());
    }

    #[test]
    fn meeting_time_accepts_rfc3339() {
        let parsed = parse_meeting_time("2026-10-20T09:00:00+08:00").expect("rfc3339");
        assert_eq!(parsed, parse_meeting_time("2026-10-20 09:00:00").expect("plain"));
    }

    #[test]
    fn equipment_parses_english_and_original_labels() {
        assert_eq!(Equipment::parse("Video Conference"), Some(Equipment::VideoConference));
        assert_eq!(Equipment::parse("投影仪"), Some(Equipment::Projector));
        assert_eq!(Equipment::parse("coffee machine"), None);
    }

    #[test]
    fn room_query_checks_capacity_equipment_and_location() {
        let base = RoomQuery {
            range: range("2026-10-20 09:00:00", "2026-10-20 10:00:00"),
            capacity: 5,
            equipment: vec![Equipment::Projector],
            preferred_locations: vec!["Building A".to_string()],
        };
        assert!(base.admits(&room()));

        let too_big = RoomQuery { capacity: 12, ..base.clone() };
        assert!(!too_big.admits(&room()));

        let needs_whiteboard = RoomQuery { equipment: vec![Equipment::Whiteboard], ..base.clone() };
        assert!(!needs_whiteboard.admits(&room()));

        let elsewhere = RoomQuery { preferred_locations: vec!["Building B".to_string()], ..base };
        assert!(!elsewhere.admits(&room()));
    }
}
