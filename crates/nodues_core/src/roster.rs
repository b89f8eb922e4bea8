//! crates/nodues_core/src/roster.rs
//!
//! The Roster Aggregator: materializes the courses, students and faculty of a
//! department into one in-memory snapshot. A failed fetch degrades to an empty
//! contribution so the rest of the department stays visible.

use futures::future::join_all;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::domain::{Course, Faculty, FacultyId, Partition, Section, Student, Year};
use crate::ports::{with_timeout, RosterStore};

//=========================================================================================
// Roster Snapshot
//=========================================================================================

/// What a failed fetch was trying to load.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchScope {
    Courses { partition: Partition },
    Students { partition: Partition },
    Faculty,
}

impl fmt::Display for FetchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchScope::Courses { partition } => write!(f, "courses of {partition}"),
            FetchScope::Students { partition } => write!(f, "students of {partition}"),
            FetchScope::Faculty => f.write_str("faculty directory"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct FetchFailure {
    pub scope: FetchScope,
    pub message: String,
}

/// A faculty member who mentors students of a partition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct MentorSummary {
    pub faculty_id: FacultyId,
    pub name: String,
    pub assigned_students: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Roster {
    pub courses: Vec<Course>,
    pub faculty: Vec<Faculty>,
    pub students: Vec<Student>,
    /// Fetches that failed and contributed nothing.
    pub failures: Vec<FetchFailure>,
}

impl Roster {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn courses_in(&self, partition: Partition) -> impl Iterator<Item = &Course> + '_ {
        self.courses.iter().filter(move |c| c.partition == partition)
    }

    pub fn students_in(&self, partition: Partition) -> impl Iterator<Item = &Student> + '_ {
        self.students.iter().filter(move |s| s.partition == partition)
    }

    /// Courses of the partition that have an instructor and can therefore be
    /// offered for clearance.
    pub fn eligible_courses(&self, partition: Partition) -> Vec<&Course> {
        self.courses_in(partition)
            .filter(|c| c.instructor.is_some())
            .collect()
    }

    pub fn coordinators(&self) -> Vec<&Faculty> {
        self.faculty.iter().filter(|f| f.is_coordinator()).collect()
    }

    pub fn mentors_for(&self, partition: Partition) -> Vec<MentorSummary> {
        self.faculty
            .iter()
            .filter_map(|faculty| {
                let assigned = self
                    .students_in(partition)
                    .filter(|s| s.mentor.as_ref() == Some(&faculty.id))
                    .count();
                (assigned > 0).then(|| MentorSummary {
                    faculty_id: faculty.id.clone(),
                    name: faculty.name.clone(),
                    assigned_students: assigned,
                })
            })
            .collect()
    }
}

//=========================================================================================
// Aggregator
//=========================================================================================

pub struct RosterAggregator {
    store: Arc<dyn RosterStore>,
    department: String,
    years: Vec<Year>,
    sections: Vec<Section>,
    timeout: Duration,
}

impl RosterAggregator {
    pub fn new(store: Arc<dyn RosterStore>, department: impl Into<String>, timeout: Duration) -> Self {
        Self {
            store,
            department: department.into(),
            years: Year::ALL.to_vec(),
            sections: Section::ALL.to_vec(),
            timeout,
        }
    }

    /// Restricts the partitions the aggregator walks.
    pub fn with_partitions(mut self, years: Vec<Year>, sections: Vec<Section>) -> Self {
        self.years = years;
        self.sections = sections;
        self
    }

    pub fn partitions(&self) -> Vec<Partition> {
        self.years
            .iter()
            .flat_map(|year| self.sections.iter().map(|section| Partition::new(*year, *section)))
            .collect()
    }

    /// Fetches the whole department. Never fails; see `Roster::failures`.
    pub async fn collect(&self) -> Roster {
        let partitions = self.partitions();
        let fetches = partitions.iter().map(|partition| self.collect_partition(*partition));
        let (partials, faculty) = futures::join!(join_all(fetches), self.collect_faculty());

        let mut roster = Roster::default();
        for partial in partials {
            roster.courses.extend(partial.courses);
            roster.students.extend(partial.students);
            roster.failures.extend(partial.failures);
        }
        match faculty {
            Ok(faculty) => roster.faculty = faculty,
            Err(failure) => roster.failures.push(failure),
        }

        info!(
            courses = roster.courses.len(),
            students = roster.students.len(),
            faculty = roster.faculty.len(),
            failures = roster.failures.len(),
            "Roster aggregated for {}",
            self.department
        );
        roster
    }

    /// Fetches one partition's courses and students.
    pub async fn collect_partition(&self, partition: Partition) -> Roster {
        let (courses, students) = futures::join!(
            with_timeout(self.timeout, self.store.list_courses(&self.department, partition)),
            with_timeout(self.timeout, self.store.list_students(partition)),
        );

        let mut roster = Roster::default();
        match courses {
            Ok(courses) => roster.courses = courses,
            Err(e) => roster.failures.push(failure(FetchScope::Courses { partition }, e)),
        }
        match students {
            // Documents filed under the wrong path are not part of this partition.
            Ok(students) => {
                roster.students = students.into_iter().filter(|s| s.partition == partition).collect()
            }
            Err(e) => roster.failures.push(failure(FetchScope::Students { partition }, e)),
        }
        roster
    }

    async fn collect_faculty(&self) -> Result<Vec<Faculty>, FetchFailure> {
        with_timeout(self.timeout, self.store.list_faculty())
            .await
            .map_err(|e| failure(FetchScope::Faculty, e))
    }
}

fn failure(scope: FetchScope, err: impl fmt::Display) -> FetchFailure {
    warn!("Failed to fetch {}: {}", scope, err);
    FetchFailure {
        scope,
        message: err.to_string(),
    }
}
