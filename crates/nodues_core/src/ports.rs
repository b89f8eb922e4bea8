//! crates/nodues_core/src/ports.rs
//!
//! Defines the service contracts (traits) the clearance workflow consumes.
//! These traits form the boundary of the hexagonal architecture: the core never
//! knows whether documents live in PostgreSQL, in memory, or elsewhere.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{
    ClearanceRecord, Course, CourseId, Faculty, FacultyId, Partition, RecordId, StaffCredentials,
    StaffIdentity, Student, StudentClearance,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    /// A compare-and-swap or uniqueness check failed.
    #[error("Conflicting write: {0}")]
    Conflict(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// Bounds a store call so a stalled backend surfaces as an error instead of a hang.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> PortResult<T>
where
    F: Future<Output = PortResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(PortError::Timeout(limit)),
    }
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// Read and relationship-update access to the roster documents.
#[async_trait]
pub trait RosterStore: Send + Sync {
    async fn list_courses(&self, department: &str, partition: Partition) -> PortResult<Vec<Course>>;

    async fn list_students(&self, partition: Partition) -> PortResult<Vec<Student>>;

    async fn list_faculty(&self) -> PortResult<Vec<Faculty>>;

    async fn get_course(
        &self,
        department: &str,
        partition: Partition,
        course_id: &CourseId,
    ) -> PortResult<Course>;

    async fn get_faculty(&self, faculty_id: &FacultyId) -> PortResult<Faculty>;

    /// Sets the course's instructor only if it has none, in one atomic step.
    /// Returns the updated course, or `Conflict` when an instructor is already set.
    async fn claim_instructor(
        &self,
        department: &str,
        partition: Partition,
        course_id: &CourseId,
        faculty_id: &FacultyId,
    ) -> PortResult<Course>;

    /// Writes the course document, creating it if needed.
    async fn put_course(&self, department: &str, course: &Course) -> PortResult<()>;

    async fn put_student(&self, student: &Student) -> PortResult<()>;

    async fn put_faculty(&self, faculty: &Faculty) -> PortResult<()>;
}

/// Append-only storage of generated clearance records.
#[async_trait]
pub trait ClearanceStore: Send + Sync {
    async fn append_record(&self, record: &ClearanceRecord) -> PortResult<()>;

    /// The record with the greatest `generated_at`, ties broken by insertion order.
    async fn latest_record(&self, partition: Partition) -> PortResult<Option<ClearanceRecord>>;

    async fn get_record(&self, partition: Partition, record_id: RecordId) -> PortResult<ClearanceRecord>;

    /// Every record of the partition, newest first.
    async fn list_records(&self, partition: Partition) -> PortResult<Vec<ClearanceRecord>>;

    /// Replaces the nested student clearances if the stored version still equals
    /// `expected_version`, returning the new version. A mismatch yields
    /// `PortError::Conflict`.
    async fn replace_students(
        &self,
        partition: Partition,
        record_id: RecordId,
        expected_version: u64,
        students: &[StudentClearance],
    ) -> PortResult<u64>;
}

/// The authentication collaborator: staff accounts and browser sessions.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn create_account(
        &self,
        email: &str,
        hashed_password: &str,
        faculty_id: Option<&FacultyId>,
        is_admin: bool,
    ) -> PortResult<StaffIdentity>;

    async fn get_account_by_email(&self, email: &str) -> PortResult<StaffCredentials>;

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<StaffIdentity>;

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()>;
}
