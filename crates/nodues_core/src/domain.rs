//! crates/nodues_core/src/domain.rs
//!
//! Defines the core data structures for the clearance workflow: the roster
//! entities (students, courses, faculty), the partition they live under, and
//! the denormalized "No Dues" clearance record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

//=========================================================================================
// Identifiers
//=========================================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(
    /// Roll-number-derived key of a student document.
    StudentId
);
string_id!(
    /// Opaque id of a course document, unique within its partition.
    CourseId
);
string_id!(
    /// Id of a faculty member, usually the identity provider's user id.
    FacultyId
);

/// Id of one generated clearance record.
pub type RecordId = Uuid;

//=========================================================================================
// Partition
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum Year {
    I,
    II,
    III,
    IV,
}

impl Year {
    pub const ALL: [Year; 4] = [Year::I, Year::II, Year::III, Year::IV];

    pub fn as_str(self) -> &'static str {
        match self {
            Year::I => "I",
            Year::II => "II",
            Year::III => "III",
            Year::IV => "IV",
        }
    }
}

impl fmt::Display for Year {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Year {
    type Err = ParsePartitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "I" | "1" => Ok(Year::I),
            "II" | "2" => Ok(Year::II),
            "III" | "3" => Ok(Year::III),
            "IV" | "4" => Ok(Year::IV),
            _ => Err(ParsePartitionError::Year(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum Section {
    A,
    B,
    C,
    D,
}

impl Section {
    pub const ALL: [Section; 4] = [Section::A, Section::B, Section::C, Section::D];

    pub fn as_str(self) -> &'static str {
        match self {
            Section::A => "A",
            Section::B => "B",
            Section::C => "C",
            Section::D => "D",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Section {
    type Err = ParsePartitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(Section::A),
            "B" => Ok(Section::B),
            "C" => Ok(Section::C),
            "D" => Ok(Section::D),
            _ => Err(ParsePartitionError::Section(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParsePartitionError {
    #[error("'{0}' is not a valid year (expected I, II, III or IV)")]
    Year(String),
    #[error("'{0}' is not a valid section (expected A, B, C or D)")]
    Section(String),
}

/// The (year, section) grouping every student, course and clearance record lives under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Partition {
    pub year: Year,
    pub section: Section,
}

impl Partition {
    pub const fn new(year: Year, section: Section) -> Self {
        Self { year, section }
    }

    /// Parses a partition from the raw strings found in paths and forms.
    pub fn parse(year: &str, section: &str) -> Result<Self, ParsePartitionError> {
        Ok(Self {
            year: year.parse()?,
            section: section.parse()?,
        })
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.year, self.section)
    }
}

//=========================================================================================
// Roster Entities
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Student {
    pub id: StudentId,
    pub roll_no: String,
    pub name: String,
    pub partition: Partition,
    /// Enrolled courses, in enrolment order.
    #[serde(default)]
    pub courses: Vec<CourseId>,
    #[serde(default)]
    pub mentor: Option<FacultyId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Course {
    pub id: CourseId,
    pub partition: Partition,
    pub code: String,
    pub name: String,
    /// At most one instructor; assignment never overwrites an existing one.
    #[serde(default)]
    pub instructor: Option<FacultyId>,
    #[serde(default)]
    pub students: Vec<StudentId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Faculty {
    pub id: FacultyId,
    pub name: String,
    #[serde(default)]
    pub designation: Option<String>,
    #[serde(default)]
    pub roles: RoleSet,
}

/// The independent role facets a faculty member can hold at the same time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RoleSet {
    #[serde(default)]
    pub instructor: Option<InstructorRole>,
    #[serde(default)]
    pub coordinator: Option<CoordinatorRole>,
    #[serde(default)]
    pub mentor: Option<MentorRole>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct InstructorRole {
    pub courses: Vec<CourseId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CoordinatorRole {
    /// Free-form category, e.g. "Class Coordinator" or "Placement".
    pub category: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct MentorRole {
    pub students: Vec<StudentId>,
}

impl Faculty {
    pub fn coordinator_category(&self) -> Option<&str> {
        self.roles.coordinator.as_ref().map(|c| c.category.as_str())
    }

    pub fn is_coordinator(&self) -> bool {
        self.roles.coordinator.is_some()
    }

    pub fn teaches(&self, course_id: &CourseId) -> bool {
        self.roles
            .instructor
            .as_ref()
            .is_some_and(|role| role.courses.contains(course_id))
    }
}

//=========================================================================================
// Clearance ("No Dues") Aggregate
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum ClearanceStatus {
    Pending,
    Accepted,
    Rejected,
}

impl ClearanceStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ClearanceStatus::Pending)
    }
}

impl fmt::Display for ClearanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ClearanceStatus::Pending => "Pending",
            ClearanceStatus::Accepted => "Accepted",
            ClearanceStatus::Rejected => "Rejected",
        })
    }
}

impl FromStr for ClearanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(ClearanceStatus::Pending),
            "accepted" => Ok(ClearanceStatus::Accepted),
            "rejected" => Ok(ClearanceStatus::Rejected),
            other => Err(format!("'{other}' is not a clearance status")),
        }
    }
}

/// Whether the student has met their obligations to a course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CourseApproval {
    pub course_id: CourseId,
    pub status: ClearanceStatus,
}

/// The instructor's sign-off for a course; `faculty_id` is `None` when the
/// course had no instructor at generation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct InstructorApproval {
    pub course_id: CourseId,
    pub faculty_id: Option<FacultyId>,
    pub status: ClearanceStatus,
}

/// A coordinator's or mentor's sign-off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PartyApproval {
    pub faculty_id: FacultyId,
    pub status: ClearanceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct StudentClearance {
    pub student_id: StudentId,
    pub roll_no: String,
    pub name: String,
    pub courses: Vec<CourseApproval>,
    pub courses_faculty: Vec<InstructorApproval>,
    pub coordinators: Vec<PartyApproval>,
    pub mentors: Vec<PartyApproval>,
}

impl StudentClearance {
    pub fn is_empty(&self) -> bool {
        self.courses.is_empty() && self.coordinators.is_empty() && self.mentors.is_empty()
    }

    /// Every status held by this student's entries, in list order.
    pub fn statuses(&self) -> impl Iterator<Item = ClearanceStatus> + '_ {
        self.courses
            .iter()
            .map(|c| c.status)
            .chain(self.courses_faculty.iter().map(|c| c.status))
            .chain(self.coordinators.iter().map(|c| c.status))
            .chain(self.mentors.iter().map(|m| m.status))
    }

    /// Rejected if any entry was rejected, Accepted once every entry is
    /// accepted, Pending otherwise.
    pub fn overall_status(&self) -> ClearanceStatus {
        let mut all_accepted = true;
        for status in self.statuses() {
            match status {
                ClearanceStatus::Rejected => return ClearanceStatus::Rejected,
                ClearanceStatus::Pending => all_accepted = false,
                ClearanceStatus::Accepted => {}
            }
        }
        if all_accepted && !self.is_empty() {
            ClearanceStatus::Accepted
        } else {
            ClearanceStatus::Pending
        }
    }
}

/// One generation event for a partition. Records are append-only; only the
/// nested statuses change after generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ClearanceRecord {
    pub id: Uuid,
    pub partition: Partition,
    pub generated_at: DateTime<Utc>,
    pub status: String,
    /// Bumped by every successful status write; guards compare-and-swap.
    pub version: u64,
    pub students: Vec<StudentClearance>,
}

impl ClearanceRecord {
    pub fn student(&self, student_id: &StudentId) -> Option<&StudentClearance> {
        self.students.iter().find(|s| &s.student_id == student_id)
    }

    pub fn summary(&self) -> RecordSummary {
        let mut summary = RecordSummary {
            id: self.id,
            partition: self.partition,
            generated_at: self.generated_at,
            status: self.status.clone(),
            version: self.version,
            students: self.students.len(),
            pending: 0,
            accepted: 0,
            rejected: 0,
        };
        for student in &self.students {
            match student.overall_status() {
                ClearanceStatus::Pending => summary.pending += 1,
                ClearanceStatus::Accepted => summary.accepted += 1,
                ClearanceStatus::Rejected => summary.rejected += 1,
            }
        }
        summary
    }
}

/// A compact view of a record used by the generation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RecordSummary {
    pub id: Uuid,
    pub partition: Partition,
    pub generated_at: DateTime<Utc>,
    pub status: String,
    pub version: u64,
    pub students: usize,
    pub pending: usize,
    pub accepted: usize,
    pub rejected: usize,
}

//=========================================================================================
// Staff Identity
//=========================================================================================

// Represents an authenticated staff member - used throughout the app
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct StaffIdentity {
    pub user_id: Uuid,
    pub email: String,
    /// Set when the account belongs to a faculty member who signs off clearances.
    pub faculty_id: Option<FacultyId>,
    pub is_admin: bool,
}

// Only used internally for login - contains sensitive data
#[derive(Debug, Clone)]
pub struct StaffCredentials {
    pub identity: StaffIdentity,
    pub hashed_password: String,
}
