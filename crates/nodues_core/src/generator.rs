//! crates/nodues_core/src/generator.rs
//!
//! The Clearance Generator: turns an operator's selection for one partition into
//! a new, append-only clearance record.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::domain::{
    ClearanceRecord, ClearanceStatus, Course, CourseApproval, CourseId, FacultyId,
    InstructorApproval, Partition, PartyApproval, Section, Student, StudentClearance, Year,
};
use crate::error::{ClearanceError, ClearanceResult};
use crate::ports::{with_timeout, ClearanceStore, RosterStore};
use crate::roster::Roster;

/// Overall status written on every freshly generated record.
pub const INITIAL_RECORD_STATUS: &str = "Pending";

//=========================================================================================
// Selection (the operator's session view model)
//=========================================================================================

/// Everything the operator picked on the generation screen.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ClearanceSelection {
    pub year: Option<Year>,
    pub section: Option<Section>,
    #[serde(default)]
    pub courses: Vec<CourseId>,
    #[serde(default)]
    pub coordinators: Vec<FacultyId>,
    #[serde(default)]
    pub mentors: Vec<FacultyId>,
}

impl ClearanceSelection {
    /// Pre-selects every coordinator and every mentor of the partition.
    /// Courses start unselected.
    pub fn defaults(roster: &Roster, partition: Partition) -> Self {
        Self {
            year: Some(partition.year),
            section: Some(partition.section),
            courses: Vec::new(),
            coordinators: roster.coordinators().into_iter().map(|f| f.id.clone()).collect(),
            mentors: roster
                .mentors_for(partition)
                .into_iter()
                .map(|m| m.faculty_id)
                .collect(),
        }
    }

    pub fn partition(&self) -> ClearanceResult<Partition> {
        match (self.year, self.section) {
            (Some(year), Some(section)) => Ok(Partition::new(year, section)),
            _ => Err(ClearanceError::Validation(
                "select both a year and a section".into(),
            )),
        }
    }
}

fn dedup<T: Clone + Eq + std::hash::Hash>(items: &[T]) -> Vec<T> {
    let mut seen = HashSet::new();
    items.iter().filter(|i| seen.insert(*i)).cloned().collect()
}

//=========================================================================================
// Pure Generation
//=========================================================================================

/// Builds the per-student clearance entries for `partition`.
///
/// Students whose course, coordinator and mentor lists would all be empty are
/// left out of the record.
pub fn build_student_clearances(
    partition: Partition,
    students: &[Student],
    courses: &[Course],
    selection: &ClearanceSelection,
) -> Vec<StudentClearance> {
    let selected_courses: HashSet<&CourseId> = selection.courses.iter().collect();
    let selected_mentors: HashSet<&FacultyId> = selection.mentors.iter().collect();
    let instructors: HashMap<&CourseId, Option<&FacultyId>> = courses
        .iter()
        .map(|c| (&c.id, c.instructor.as_ref()))
        .collect();
    let coordinators: Vec<PartyApproval> = dedup(&selection.coordinators)
        .into_iter()
        .map(|faculty_id| PartyApproval {
            faculty_id,
            status: ClearanceStatus::Pending,
        })
        .collect();

    students
        .iter()
        .filter(|student| student.partition == partition)
        .map(|student| {
            let associated: Vec<CourseId> = dedup(&student.courses)
                .into_iter()
                .filter(|id| selected_courses.contains(id))
                .collect();

            let courses_faculty = associated
                .iter()
                .map(|course_id| InstructorApproval {
                    course_id: course_id.clone(),
                    faculty_id: instructors.get(course_id).copied().flatten().cloned(),
                    status: ClearanceStatus::Pending,
                })
                .collect();

            let mentors = student
                .mentor
                .as_ref()
                .filter(|mentor| selected_mentors.contains(mentor))
                .map(|mentor| PartyApproval {
                    faculty_id: mentor.clone(),
                    status: ClearanceStatus::Pending,
                })
                .into_iter()
                .collect();

            StudentClearance {
                student_id: student.id.clone(),
                roll_no: student.roll_no.clone(),
                name: student.name.clone(),
                courses: associated
                    .into_iter()
                    .map(|course_id| CourseApproval {
                        course_id,
                        status: ClearanceStatus::Pending,
                    })
                    .collect(),
                courses_faculty,
                coordinators: coordinators.clone(),
                mentors,
            }
        })
        .filter(|clearance| !clearance.is_empty())
        .collect()
}

//=========================================================================================
// Generator Service
//=========================================================================================

pub struct ClearanceGenerator {
    roster: Arc<dyn RosterStore>,
    clearances: Arc<dyn ClearanceStore>,
    department: String,
    timeout: Duration,
}

impl ClearanceGenerator {
    pub fn new(
        roster: Arc<dyn RosterStore>,
        clearances: Arc<dyn ClearanceStore>,
        department: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            roster,
            clearances,
            department: department.into(),
            timeout,
        }
    }

    /// Validates the selection, builds the entries from a fresh fetch of the
    /// partition and appends one new record. Nothing is written on failure.
    pub async fn generate(&self, selection: &ClearanceSelection) -> ClearanceResult<ClearanceRecord> {
        let partition = selection.partition()?;

        let (students, courses) = futures::try_join!(
            with_timeout(self.timeout, self.roster.list_students(partition)),
            with_timeout(
                self.timeout,
                self.roster.list_courses(&self.department, partition)
            ),
        )?;

        let known: HashSet<&CourseId> = courses.iter().map(|c| &c.id).collect();
        if let Some(unknown) = selection.courses.iter().find(|id| !known.contains(id)) {
            return Err(ClearanceError::Validation(format!(
                "course {unknown} does not belong to {partition}"
            )));
        }

        let record = ClearanceRecord {
            id: Uuid::new_v4(),
            partition,
            generated_at: Utc::now(),
            status: INITIAL_RECORD_STATUS.to_string(),
            version: 0,
            students: build_student_clearances(partition, &students, &courses, selection),
        };

        with_timeout(self.timeout, self.clearances.append_record(&record)).await?;
        info!(
            record_id = %record.id,
            students = record.students.len(),
            "Generated clearance record for {}",
            partition
        );
        Ok(record)
    }
}
