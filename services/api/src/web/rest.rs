//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::web::{auth, state::AppState};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use nodues_core::{
    domain::{ClearanceRecord, Course, CourseId, Faculty, FacultyId, Partition, RecordSummary, StudentId},
    roster::{FetchFailure, MentorSummary, Roster},
    ClearanceError, ClearanceQuery, ClearanceSelection, ClearanceStatus, ClearanceView, PortError,
    RollOrder, StaffIdentity, TransitionOutcome, TransitionRequest,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::login_handler,
        auth::logout_handler,
        auth::me_handler,
        auth::create_account_handler,
        roster_handler,
        selection_handler,
        generate_handler,
        latest_handler,
        history_handler,
        transition_handler,
        assign_instructor_handler,
        unassign_instructor_handler,
        assign_mentor_handler,
        remove_mentors_handler,
        set_coordinator_handler,
    ),
    components(
        schemas(
            auth::LoginRequest,
            auth::CreateAccountRequest,
            SelectionResponse,
            AssignInstructorRequest,
            AssignMentorRequest,
            AssignMentorResponse,
            RemoveMentorsRequest,
            RemoveMentorsResponse,
            SetCoordinatorRequest,
        )
    ),
    tags(
        (name = "No-Dues Clearance API", description = "Roster administration and no-dues clearance tracking.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// Everything the generation screen offers for one partition.
#[derive(Serialize, ToSchema)]
pub struct SelectionResponse {
    pub partition: Partition,
    /// Courses of the partition with an instructor.
    pub courses: Vec<Course>,
    pub coordinators: Vec<Faculty>,
    pub mentors: Vec<MentorSummary>,
    /// The pre-filled selection: every coordinator and mentor, no courses.
    pub defaults: ClearanceSelection,
    pub failures: Vec<FetchFailure>,
}

#[derive(Deserialize, ToSchema)]
pub struct AssignInstructorRequest {
    pub faculty_id: FacultyId,
}

#[derive(Deserialize, ToSchema)]
pub struct AssignMentorRequest {
    pub faculty_id: FacultyId,
    pub count: usize,
}

#[derive(Serialize, ToSchema)]
pub struct AssignMentorResponse {
    pub assigned: Vec<StudentId>,
}

#[derive(Deserialize, ToSchema)]
pub struct RemoveMentorsRequest {
    pub student_ids: Vec<StudentId>,
}

#[derive(Serialize, ToSchema)]
pub struct RemoveMentorsResponse {
    pub removed: usize,
}

#[derive(Deserialize, ToSchema)]
pub struct SetCoordinatorRequest {
    pub category: String,
}

//=========================================================================================
// Error Mapping
//=========================================================================================

type HandlerError = (StatusCode, String);

/// Maps a workflow error onto the HTTP status the client sees.
pub fn clearance_error(err: ClearanceError) -> HandlerError {
    let status = match &err {
        ClearanceError::NotFound(_) => StatusCode::NOT_FOUND,
        ClearanceError::Validation(_) => StatusCode::BAD_REQUEST,
        ClearanceError::Forbidden(_) => StatusCode::FORBIDDEN,
        ClearanceError::InvalidTransition { .. }
        | ClearanceError::WriteConflict(_)
        | ClearanceError::AlreadyAssigned(_) => StatusCode::CONFLICT,
        ClearanceError::Store(PortError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
        ClearanceError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!("Request failed: {}", err);
    }
    (status, err.to_string())
}

pub fn require_admin(actor: &StaffIdentity) -> Result<(), HandlerError> {
    if actor.is_admin {
        Ok(())
    } else {
        Err((
            StatusCode::FORBIDDEN,
            "Only administrators can do this".to_string(),
        ))
    }
}

fn parse_partition(year: &str, section: &str) -> Result<Partition, HandlerError> {
    Partition::parse(year, section).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))
}

//=========================================================================================
// Roster Handlers
//=========================================================================================

/// The aggregated department roster. Partial fetch failures are reported in
/// `failures` rather than failing the request.
#[utoipa::path(
    get,
    path = "/roster",
    responses(
        (status = 200, description = "Aggregated roster", body = Roster),
        (status = 401, description = "Not logged in")
    )
)]
pub async fn roster_handler(State(state): State<Arc<AppState>>) -> Json<Roster> {
    Json(state.aggregator.collect().await)
}

/// The courses, coordinators and mentors that can go into a clearance.
#[utoipa::path(
    get,
    path = "/partitions/{year}/{section}/selection",
    params(
        ("year" = String, Path, description = "I, II, III or IV"),
        ("section" = String, Path, description = "A, B, C or D")
    ),
    responses(
        (status = 200, description = "Selection options", body = SelectionResponse),
        (status = 400, description = "Unknown year or section")
    )
)]
pub async fn selection_handler(
    State(state): State<Arc<AppState>>,
    Path((year, section)): Path<(String, String)>,
) -> Result<Json<SelectionResponse>, HandlerError> {
    let partition = parse_partition(&year, &section)?;
    let roster = state.aggregator.collect().await;

    Ok(Json(SelectionResponse {
        partition,
        courses: roster.eligible_courses(partition).into_iter().cloned().collect(),
        coordinators: roster.coordinators().into_iter().cloned().collect(),
        mentors: roster.mentors_for(partition),
        defaults: ClearanceSelection::defaults(&roster, partition),
        failures: roster.failures,
    }))
}

//=========================================================================================
// Clearance Handlers
//=========================================================================================

/// Generate a new clearance record for the selected partition (admin only).
#[utoipa::path(
    post,
    path = "/clearances",
    request_body = ClearanceSelection,
    responses(
        (status = 201, description = "Record generated", body = ClearanceRecord),
        (status = 400, description = "Incomplete or inconsistent selection"),
        (status = 403, description = "Not an administrator")
    )
)]
pub async fn generate_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<StaffIdentity>,
    Json(selection): Json<ClearanceSelection>,
) -> Result<impl IntoResponse, HandlerError> {
    require_admin(&actor)?;
    let record = state
        .generator
        .generate(&selection)
        .await
        .map_err(clearance_error)?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// The latest clearance of a partition, enriched, filtered and sorted.
#[utoipa::path(
    get,
    path = "/clearances/{year}/{section}/latest",
    params(
        ("year" = String, Path, description = "I, II, III or IV"),
        ("section" = String, Path, description = "A, B, C or D"),
        ("roll" = Option<String>, Query, description = "Case-insensitive roll-number substring"),
        ("status" = Option<ClearanceStatus>, Query, description = "Overall student status"),
        ("order" = Option<RollOrder>, Query, description = "Roll-number order, asc or desc")
    ),
    responses(
        (status = 200, description = "Clearance view", body = ClearanceView),
        (status = 404, description = "Nothing generated for this partition yet")
    )
)]
pub async fn latest_handler(
    State(state): State<Arc<AppState>>,
    Path((year, section)): Path<(String, String)>,
    Query(query): Query<ClearanceQuery>,
) -> Result<Json<ClearanceView>, HandlerError> {
    let partition = parse_partition(&year, &section)?;
    let view = state
        .tracker
        .load_view(partition, &query)
        .await
        .map_err(clearance_error)?;
    Ok(Json(view))
}

/// Every clearance ever generated for the partition, newest first.
#[utoipa::path(
    get,
    path = "/clearances/{year}/{section}/history",
    params(
        ("year" = String, Path, description = "I, II, III or IV"),
        ("section" = String, Path, description = "A, B, C or D")
    ),
    responses(
        (status = 200, description = "Record summaries", body = Vec<RecordSummary>)
    )
)]
pub async fn history_handler(
    State(state): State<Arc<AppState>>,
    Path((year, section)): Path<(String, String)>,
) -> Result<Json<Vec<RecordSummary>>, HandlerError> {
    let partition = parse_partition(&year, &section)?;
    let history = state.tracker.history(partition).await.map_err(clearance_error)?;
    Ok(Json(history))
}

/// Accept or reject one approval entry of one student.
#[utoipa::path(
    post,
    path = "/clearances/{year}/{section}/{record_id}/transitions",
    params(
        ("year" = String, Path, description = "I, II, III or IV"),
        ("section" = String, Path, description = "A, B, C or D"),
        ("record_id" = Uuid, Path, description = "The clearance record to update")
    ),
    request_body = TransitionRequest,
    responses(
        (status = 200, description = "Entry updated", body = TransitionOutcome),
        (status = 400, description = "Target status is not Accepted or Rejected"),
        (status = 403, description = "Not the authority for this entry"),
        (status = 404, description = "Unknown record, student or entry"),
        (status = 409, description = "Entry already decided or the write kept conflicting")
    )
)]
pub async fn transition_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<StaffIdentity>,
    Path((year, section, record_id)): Path<(String, String, Uuid)>,
    Json(request): Json<TransitionRequest>,
) -> Result<Json<TransitionOutcome>, HandlerError> {
    let partition = parse_partition(&year, &section)?;
    let outcome = state
        .tracker
        .transition_status(&actor, partition, record_id, &request)
        .await
        .map_err(clearance_error)?;
    Ok(Json(outcome))
}

//=========================================================================================
// Assignment Handlers
//=========================================================================================

/// Make a faculty member the instructor of a course (admin only).
#[utoipa::path(
    put,
    path = "/partitions/{year}/{section}/courses/{course_id}/instructor",
    params(
        ("year" = String, Path, description = "I, II, III or IV"),
        ("section" = String, Path, description = "A, B, C or D"),
        ("course_id" = String, Path, description = "Course document id")
    ),
    request_body = AssignInstructorRequest,
    responses(
        (status = 200, description = "Instructor assigned", body = Course),
        (status = 404, description = "Unknown course or faculty"),
        (status = 409, description = "The course already has an instructor")
    )
)]
pub async fn assign_instructor_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<StaffIdentity>,
    Path((year, section, course_id)): Path<(String, String, String)>,
    Json(req): Json<AssignInstructorRequest>,
) -> Result<Json<Course>, HandlerError> {
    require_admin(&actor)?;
    let partition = parse_partition(&year, &section)?;
    let course = state
        .assignments
        .assign_instructor(partition, &CourseId::new(course_id), &req.faculty_id)
        .await
        .map_err(clearance_error)?;
    Ok(Json(course))
}

/// Remove the instructor of a course (admin only).
#[utoipa::path(
    delete,
    path = "/partitions/{year}/{section}/courses/{course_id}/instructor",
    params(
        ("year" = String, Path, description = "I, II, III or IV"),
        ("section" = String, Path, description = "A, B, C or D"),
        ("course_id" = String, Path, description = "Course document id")
    ),
    responses(
        (status = 200, description = "Instructor removed", body = Course),
        (status = 400, description = "The course has no instructor"),
        (status = 404, description = "Unknown course")
    )
)]
pub async fn unassign_instructor_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<StaffIdentity>,
    Path((year, section, course_id)): Path<(String, String, String)>,
) -> Result<Json<Course>, HandlerError> {
    require_admin(&actor)?;
    let partition = parse_partition(&year, &section)?;
    let course = state
        .assignments
        .unassign_instructor(partition, &CourseId::new(course_id))
        .await
        .map_err(clearance_error)?;
    Ok(Json(course))
}

/// Assign a mentor to the next `count` students without one (admin only).
#[utoipa::path(
    post,
    path = "/partitions/{year}/{section}/mentors",
    params(
        ("year" = String, Path, description = "I, II, III or IV"),
        ("section" = String, Path, description = "A, B, C or D")
    ),
    request_body = AssignMentorRequest,
    responses(
        (status = 200, description = "Students assigned", body = AssignMentorResponse),
        (status = 400, description = "Count is zero or exceeds the unassigned students")
    )
)]
pub async fn assign_mentor_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<StaffIdentity>,
    Path((year, section)): Path<(String, String)>,
    Json(req): Json<AssignMentorRequest>,
) -> Result<Json<AssignMentorResponse>, HandlerError> {
    require_admin(&actor)?;
    let partition = parse_partition(&year, &section)?;
    let assigned = state
        .assignments
        .assign_mentor(partition, &req.faculty_id, req.count)
        .await
        .map_err(clearance_error)?;
    Ok(Json(AssignMentorResponse { assigned }))
}

/// Clear the mentor of the listed students (admin only).
#[utoipa::path(
    delete,
    path = "/partitions/{year}/{section}/mentors",
    params(
        ("year" = String, Path, description = "I, II, III or IV"),
        ("section" = String, Path, description = "A, B, C or D")
    ),
    request_body = RemoveMentorsRequest,
    responses(
        (status = 200, description = "Mentors removed", body = RemoveMentorsResponse)
    )
)]
pub async fn remove_mentors_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<StaffIdentity>,
    Path((year, section)): Path<(String, String)>,
    Json(req): Json<RemoveMentorsRequest>,
) -> Result<Json<RemoveMentorsResponse>, HandlerError> {
    require_admin(&actor)?;
    let partition = parse_partition(&year, &section)?;
    let removed = state
        .assignments
        .remove_mentors(partition, &req.student_ids)
        .await
        .map_err(clearance_error)?;
    Ok(Json(RemoveMentorsResponse { removed }))
}

/// Tag a faculty member as a coordinator of the given category (admin only).
#[utoipa::path(
    put,
    path = "/faculty/{faculty_id}/coordinator",
    params(
        ("faculty_id" = String, Path, description = "Faculty document id")
    ),
    request_body = SetCoordinatorRequest,
    responses(
        (status = 200, description = "Coordinator set", body = Faculty),
        (status = 400, description = "Blank category"),
        (status = 404, description = "Unknown faculty")
    )
)]
pub async fn set_coordinator_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<StaffIdentity>,
    Path(faculty_id): Path<String>,
    Json(req): Json<SetCoordinatorRequest>,
) -> Result<Json<Faculty>, HandlerError> {
    require_admin(&actor)?;
    let faculty = state
        .assignments
        .set_coordinator(&FacultyId::new(faculty_id), &req.category)
        .await
        .map_err(clearance_error)?;
    Ok(Json(faculty))
}
