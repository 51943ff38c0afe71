//! Meeting-room actions exposed to the model.
//!
//! Reads (`recommend_available_rooms`, `lookup_user_bookings`) run without
//! confirmation. Everything that creates, cancels or alters a reservation is
//! sensitive.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use huddle_core::domain::booking::{
    format_meeting_time, parse_meeting_time, BookingStore, BookingStoreError, Equipment,
    NewReservation, Reservation, ReservationId, ReservationStatus, Room, RoomId, RoomQuery,
    TimeRange,
};

use crate::guardrails::ConfirmationPolicy;
use crate::tools::{Action, ActionError, ActionRegistry, ActionSpec, RegistryError, Safety, SideEffect};

/// Source of "now" for actions that filter by time.
pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(|| Local::now().naive_local())
}

/// Registry with all five booking actions under the default confirmation policy.
pub fn booking_registry(
    store: Arc<dyn BookingStore>,
    clock: Clock,
) -> Result<ActionRegistry, RegistryError> {
    let mut registry = ActionRegistry::with_policy(ConfirmationPolicy::default());
    registry.register(RecommendAvailableRooms { store: Arc::clone(&store) })?;
    registry.register(LookupUserBookings { store: Arc::clone(&store), clock })?;
    registry.register(BookRoom { store: Arc::clone(&store) })?;
    registry.register(CancelBookings { store })?;
    registry.register(AlterBooking)?;
    Ok(registry)
}

fn parse_arguments<T>(arguments: Value) -> Result<T, ActionError>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_value(arguments).map_err(|error| ActionError::invalid(error.to_string()))
}

fn parse_range(start: &str, end: &str) -> Result<TimeRange, ActionError> {
    let start_at = parse_meeting_time(start)
        .ok_or_else(|| ActionError::invalid(format!("unrecognised start_time `{start}`")))?;
    let end_at = parse_meeting_time(end)
        .ok_or_else(|| ActionError::invalid(format!("unrecognised end_time `{end}`")))?;
    TimeRange::new(start_at, end_at)
        .ok_or_else(|| ActionError::invalid("end_time must be after start_time"))
}

fn to_json<T: Serialize>(value: &T) -> Result<String, ActionError> {
    serde_json::to_string(value).map_err(|error| ActionError::Rejected(error.to_string()))
}

/// Accepts either `"Building A"` or `["Building A", "Building B"]`.
#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    #[default]
    None,
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::None => Vec::new(),
            Self::One(value) => vec![value],
            Self::Many(values) => values,
        }
    }
}

#[derive(Debug, Serialize)]
struct RoomView {
    room_id: i64,
    name: String,
    building: String,
    capacity: u32,
    equipment: Vec<Equipment>,
}

impl From<&Room> for RoomView {
    fn from(room: &Room) -> Self {
        let equipment = [
            Equipment::Projector,
            Equipment::Whiteboard,
            Equipment::VideoConference,
            Equipment::Screen,
        ]
        .into_iter()
        .filter(|equipment| room.has(*equipment))
        .collect();

        Self {
            room_id: room.id.0,
            name: room.name.clone(),
            building: room.building.clone(),
            capacity: room.capacity,
            equipment,
        }
    }
}

#[derive(Debug, Serialize)]
struct BookingView {
    booking_id: i64,
    room_id: i64,
    title: String,
    start_time: String,
    end_time: String,
    duration_minutes: i64,
}

impl From<&Reservation> for BookingView {
    fn from(reservation: &Reservation) -> Self {
        Self {
            booking_id: reservation.id.0,
            room_id: reservation.room_id.0,
            title: reservation.title.clone(),
            start_time: format_meeting_time(&reservation.start),
            end_time: format_meeting_time(&reservation.end),
            duration_minutes: reservation.range().duration_minutes(),
        }
    }
}

pub struct RecommendAvailableRooms {
    store: Arc<dyn BookingStore>,
}

#[derive(Debug, Deserialize)]
struct RecommendArgs {
    start_time: String,
    end_time: String,
    capacity: u32,
    #[serde(default)]
    equipment_needs: Vec<String>,
    #[serde(default)]
    preferred_location: OneOrMany,
}

#[async_trait]
impl Action for RecommendAvailableRooms {
    fn spec(&self) -> ActionSpec {
        ActionSpec {
            name: "recommend_available_rooms".to_string(),
            description: "Search for meeting rooms that are free for the whole time range and \
                          fit the headcount, equipment and location preferences. Safe to run \
                          without confirmation."
                .to_string(),
            safety: Safety::Safe,
            effect: SideEffect::ReadOnly,
            parameters: json!({
                "type": "object",
                "properties": {
                    "start_time": {"type": "string", "description": "Meeting start, 'YYYY-MM-DD HH:MM:SS'"},
                    "end_time": {"type": "string", "description": "Meeting end, 'YYYY-MM-DD HH:MM:SS'"},
                    "capacity": {"type": "integer", "minimum": 1, "description": "Number of attendees"},
                    "equipment_needs": {
                        "type": "array",
                        "items": {"type": "string", "enum": ["projector", "whiteboard", "video_conference", "screen"]}
                    },
                    "preferred_location": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Building names, matched by substring"
                    }
                },
                "required": ["start_time", "end_time", "capacity"]
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> Result<String, ActionError> {
        let args: RecommendArgs = parse_arguments(arguments)?;
        let range = parse_range(&args.start_time, &args.end_time)?;
        let equipment = args
            .equipment_needs
            .iter()
            .map(|name| {
                Equipment::parse(name)
                    .ok_or_else(|| ActionError::invalid(format!("unknown equipment `{name}`")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let query = RoomQuery {
            range,
            capacity: args.capacity,
            equipment,
            preferred_locations: args.preferred_location.into_vec(),
        };

        let mut available = Vec::new();
        for room in self.store.list_rooms().await? {
            if !query.admits(&room) {
                continue;
            }
            let busy = self
                .store
                .reservations_for_room(room.id)
                .await?
                .iter()
                .any(|reservation| reservation.is_active() && reservation.range().overlaps(&range));
            if !busy {
                available.push(RoomView::from(&room));
            }
        }

        tracing::debug!(
            event_name = "action.recommend_available_rooms",
            capacity = query.capacity,
            matches = available.len(),
            "room search finished"
        );
        to_json(&available)
    }
}

pub struct LookupUserBookings {
    store: Arc<dyn BookingStore>,
    clock: Clock,
}

#[derive(Debug, Deserialize)]
struct LookupArgs {
    user_id: i64,
}

#[async_trait]
impl Action for LookupUserBookings {
    fn spec(&self) -> ActionSpec {
        ActionSpec {
            name: "lookup_user_bookings".to_string(),
            description: "List the user's upcoming confirmed bookings, including booking ids \
                          needed to cancel or alter them. Safe to run without confirmation."
                .to_string(),
            safety: Safety::Safe,
            effect: SideEffect::ReadOnly,
            parameters: json!({
                "type": "object",
                "properties": {"user_id": {"type": "integer"}},
                "required": ["user_id"]
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> Result<String, ActionError> {
        let args: LookupArgs = parse_arguments(arguments)?;
        let now = (self.clock)();

        let upcoming: Vec<BookingView> = self
            .store
            .reservations_for_organizer(args.user_id)
            .await?
            .iter()
            .filter(|reservation| reservation.is_active() && reservation.start > now)
            .map(BookingView::from)
            .collect();

        to_json(&upcoming)
    }
}

pub struct BookRoom {
    store: Arc<dyn BookingStore>,
}

#[derive(Debug, Deserialize)]
struct BookArgs {
    room_id: i64,
    user_id: i64,
    start_time: String,
    end_time: String,
    title: String,
}

#[async_trait]
impl Action for BookRoom {
    fn spec(&self) -> ActionSpec {
        ActionSpec {
            name: "book_room".to_string(),
            description: "Reserve a meeting room for the user. Creates a booking record and \
                          therefore requires the user's confirmation."
                .to_string(),
            safety: Safety::Sensitive,
            effect: SideEffect::Mutating,
            parameters: json!({
                "type": "object",
                "properties": {
                    "room_id": {"type": "integer"},
                    "user_id": {"type": "integer"},
                    "start_time": {"type": "string", "description": "'YYYY-MM-DD HH:MM:SS'"},
                    "end_time": {"type": "string", "description": "'YYYY-MM-DD HH:MM:SS'"},
                    "title": {"type": "string", "description": "Meeting subject"}
                },
                "required": ["room_id", "user_id", "start_time", "end_time", "title"]
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> Result<String, ActionError> {
        let args: BookArgs = parse_arguments(arguments)?;
        let range = parse_range(&args.start_time, &args.end_time)?;
        let title = args.title.trim();
        if title.is_empty() {
            return Err(ActionError::invalid("title must not be empty"));
        }

        let room = self
            .store
            .find_room(RoomId(args.room_id))
            .await?
            .ok_or_else(|| ActionError::Rejected(format!("room {} does not exist", args.room_id)))?;

        let existing = self.store.reservations_for_room(room.id).await?;
        if let Some(clash) = existing
            .iter()
            .find(|reservation| reservation.is_active() && reservation.range().overlaps(&range))
        {
            return Err(ActionError::Rejected(format!(
                "{} is already booked from {} to {}",
                room.name,
                format_meeting_time(&clash.start),
                format_meeting_time(&clash.end)
            )));
        }

        let created = self
            .store
            .insert_reservation(NewReservation {
                room_id: room.id,
                organizer_id: args.user_id,
                title: title.to_string(),
                range,
            })
            .await
            .map_err(|error| match error {
                BookingStoreError::SlotTaken { .. } => ActionError::Rejected(format!(
                    "{} was booked by someone else between {} and {}",
                    room.name,
                    format_meeting_time(&range.start),
                    format_meeting_time(&range.end)
                )),
                other => ActionError::from(other),
            })?;

        tracing::info!(
            event_name = "action.book_room.created",
            reservation_id = created.id.0,
            room_id = room.id.0,
            organizer_id = args.user_id,
            "reservation created"
        );

        Ok(format!(
            "Booked {} (booking #{}) for \"{}\" from {} to {} ({} minutes).",
            room.name,
            created.id.0,
            created.title,
            format_meeting_time(&created.start),
            format_meeting_time(&created.end),
            range.duration_minutes()
        ))
    }
}

pub struct CancelBookings {
    store: Arc<dyn BookingStore>,
}

#[derive(Debug, Deserialize)]
struct CancelArgs {
    user_id: i64,
    booking_ids: Vec<i64>,
}

#[async_trait]
impl Action for CancelBookings {
    fn spec(&self) -> ActionSpec {
        ActionSpec {
            name: "cancel_bookings".to_string(),
            description: "Cancel one or more of the user's bookings by id. Only bookings \
                          organised by the user can be cancelled. Requires confirmation."
                .to_string(),
            safety: Safety::Sensitive,
            effect: SideEffect::Mutating,
            parameters: json!({
                "type": "object",
                "properties": {
                    "user_id": {"type": "integer"},
                    "booking_ids": {"type": "array", "items": {"type": "integer"}, "minItems": 1}
                },
                "required": ["user_id", "booking_ids"]
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> Result<String, ActionError> {
        let args: CancelArgs = parse_arguments(arguments)?;
        if args.booking_ids.is_empty() {
            return Err(ActionError::invalid("booking_ids must not be empty"));
        }

        let mut cancelled = 0_usize;
        let mut errors = Vec::new();
        for id in args.booking_ids {
            match self.store.find_reservation(ReservationId(id)).await? {
                None => errors.push(format!("booking {id} does not exist")),
                Some(reservation) if reservation.organizer_id != args.user_id => {
                    errors.push(format!("booking {id} does not belong to user {}", args.user_id))
                }
                Some(reservation) if !reservation.is_active() => {
                    errors.push(format!("booking {id} is already cancelled"))
                }
                Some(reservation) => {
                    self.store
                        .update_reservation_status(reservation.id, ReservationStatus::Cancelled)
                        .await?;
                    cancelled += 1;
                }
            }
        }

        let mut summary = format!("Cancelled {cancelled} booking(s).");
        if !errors.is_empty() {
            summary.push_str(" Errors: ");
            summary.push_str(&errors.join("; "));
        }
        Ok(summary)
    }
}

/// Moving a booking would need its own availability check, so the action
/// steers the model towards cancel-and-rebook instead.
pub struct AlterBooking;

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct AlterArgs {
    booking_id: i64,
    user_id: i64,
    #[serde(default)]
    new_start_time: Option<String>,
    #[serde(default)]
    new_end_time: Option<String>,
}

#[async_trait]
impl Action for AlterBooking {
    fn spec(&self) -> ActionSpec {
        ActionSpec {
            name: "alter_booking".to_string(),
            description: "Change the time of an existing booking. Requires confirmation."
                .to_string(),
            safety: Safety::Sensitive,
            effect: SideEffect::Mutating,
            parameters: json!({
                "type": "object",
                "properties": {
                    "booking_id": {"type": "integer"},
                    "user_id": {"type": "integer"},
                    "new_start_time": {"type": "string"},
                    "new_end_time": {"type": "string"}
                },
                "required": ["booking_id", "user_id"]
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> Result<String, ActionError> {
        let _: AlterArgs = parse_arguments(arguments)?;
        Ok("Changing a booking in place is not supported. Cancel the original booking with \
            `cancel_bookings`, then use `recommend_available_rooms` and `book_room` to create \
            a new one."
            .to_string())
    }
}
