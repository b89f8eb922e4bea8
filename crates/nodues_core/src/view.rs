//! crates/nodues_core/src/view.rs
//!
//! Read-side presentation of a clearance record: display-name enrichment plus
//! the roll-number sort and roll/status filters of the tracking screen. Nothing
//! here touches the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::{
    ClearanceRecord, ClearanceStatus, Course, CourseId, Faculty, FacultyId, Partition,
    StudentClearance, StudentId,
};

/// Rendered in place of an instructor name when a course had none at generation.
pub const UNASSIGNED: &str = "Unassigned";

/// Which list of a student's clearance an entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum PartyKind {
    /// `courses`, keyed by course id.
    Course,
    /// `courses_faculty`, keyed by course id.
    CourseFaculty,
    Coordinator,
    Mentor,
}

//=========================================================================================
// Display Names
//=========================================================================================

#[derive(Debug, Clone, Default)]
pub struct DisplayNames {
    courses: HashMap<CourseId, String>,
    faculty: HashMap<FacultyId, String>,
    categories: HashMap<FacultyId, String>,
}

impl DisplayNames {
    pub fn new(courses: &[Course], faculty: &[Faculty]) -> Self {
        Self {
            courses: courses.iter().map(|c| (c.id.clone(), c.name.clone())).collect(),
            faculty: faculty.iter().map(|f| (f.id.clone(), f.name.clone())).collect(),
            categories: faculty
                .iter()
                .filter_map(|f| Some((f.id.clone(), f.coordinator_category()?.to_string())))
                .collect(),
        }
    }

    /// Falls back to the raw id when the course is unknown.
    pub fn course(&self, id: &CourseId) -> String {
        self.courses.get(id).cloned().unwrap_or_else(|| id.to_string())
    }

    pub fn faculty(&self, id: &FacultyId) -> String {
        self.faculty.get(id).cloned().unwrap_or_else(|| id.to_string())
    }

    pub fn category(&self, id: &FacultyId) -> Option<String> {
        self.categories.get(id).cloned()
    }
}

//=========================================================================================
// View Types
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ApprovalRow {
    pub kind: PartyKind,
    /// The id a transition request must carry for this entry.
    pub party_id: String,
    pub label: String,
    /// Who signs off: the instructor for course-faculty rows, the category for coordinators.
    pub authority: Option<String>,
    pub status: ClearanceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct StudentRow {
    pub student_id: StudentId,
    pub roll_no: String,
    pub name: String,
    pub overall_status: ClearanceStatus,
    pub approvals: Vec<ApprovalRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ClearanceView {
    pub record_id: Uuid,
    pub partition: Partition,
    pub generated_at: DateTime<Utc>,
    pub status: String,
    pub version: u64,
    /// Number of students in the record before filtering.
    pub total_students: usize,
    pub students: Vec<StudentRow>,
}

impl ClearanceView {
    pub fn build(record: &ClearanceRecord, names: &DisplayNames, query: &ClearanceQuery) -> Self {
        let rows = record.students.iter().map(|s| student_row(s, names)).collect();
        Self {
            record_id: record.id,
            partition: record.partition,
            generated_at: record.generated_at,
            status: record.status.clone(),
            version: record.version,
            total_students: record.students.len(),
            students: query.apply(rows),
        }
    }
}

pub fn student_row(student: &StudentClearance, names: &DisplayNames) -> StudentRow {
    let courses = student.courses.iter().map(|c| ApprovalRow {
        kind: PartyKind::Course,
        party_id: c.course_id.to_string(),
        label: names.course(&c.course_id),
        authority: None,
        status: c.status,
    });
    let courses_faculty = student.courses_faculty.iter().map(|c| ApprovalRow {
        kind: PartyKind::CourseFaculty,
        party_id: c.course_id.to_string(),
        label: names.course(&c.course_id),
        authority: Some(
            c.faculty_id
                .as_ref()
                .map_or_else(|| UNASSIGNED.to_string(), |f| names.faculty(f)),
        ),
        status: c.status,
    });
    let coordinators = student.coordinators.iter().map(|c| ApprovalRow {
        kind: PartyKind::Coordinator,
        party_id: c.faculty_id.to_string(),
        label: names.faculty(&c.faculty_id),
        authority: names.category(&c.faculty_id),
        status: c.status,
    });
    let mentors = student.mentors.iter().map(|m| ApprovalRow {
        kind: PartyKind::Mentor,
        party_id: m.faculty_id.to_string(),
        label: names.faculty(&m.faculty_id),
        authority: None,
        status: m.status,
    });

    StudentRow {
        student_id: student.student_id.clone(),
        roll_no: student.roll_no.clone(),
        name: student.name.clone(),
        overall_status: student.overall_status(),
        approvals: courses
            .chain(courses_faculty)
            .chain(coordinators)
            .chain(mentors)
            .collect(),
    }
}

//=========================================================================================
// Sorting and Filtering
//=========================================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum RollOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClearanceQuery {
    /// Case-insensitive roll-number substring.
    pub roll: Option<String>,
    /// Match on the student's overall status, any letter case; blank means all.
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: Option<ClearanceStatus>,
    #[serde(default)]
    pub order: RollOrder,
}

fn lenient_status<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<ClearanceStatus>, D::Error> {
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) if !raw.trim().is_empty() => raw.parse().map(Some).map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

impl ClearanceQuery {
    pub fn apply(&self, rows: Vec<StudentRow>) -> Vec<StudentRow> {
        let needle = self
            .roll
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_lowercase);

        let mut rows: Vec<StudentRow> = rows
            .into_iter()
            .filter(|row| {
                needle
                    .as_ref()
                    .map_or(true, |n| row.roll_no.to_lowercase().contains(n.as_str()))
            })
            .filter(|row| self.status.map_or(true, |s| row.overall_status == s))
            .collect();

        rows.sort_by(|a, b| match self.order {
            RollOrder::Asc => a.roll_no.cmp(&b.roll_no),
            RollOrder::Desc => b.roll_no.cmp(&a.roll_no),
        });
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CoordinatorRole, InstructorApproval, PartyApproval, RoleSet, Section, Year};

    fn row(roll: &str, status: ClearanceStatus) -> StudentRow {
        StudentRow {
            student_id: StudentId::new(roll),
            roll_no: roll.into(),
            name: roll.into(),
            overall_status: status,
            approvals: Vec::new(),
        }
    }

    fn rolls(rows: &[StudentRow]) -> Vec<&str> {
        rows.iter().map(|r| r.roll_no.as_str()).collect()
    }

    #[test]
    fn sorts_by_roll_in_either_direction() {
        let rows = vec![
            row("21CS03", ClearanceStatus::Pending),
            row("21CS01", ClearanceStatus::Pending),
            row("21CS02", ClearanceStatus::Pending),
        ];
        let asc = ClearanceQuery::default().apply(rows.clone());
        assert_eq!(rolls(&asc), vec!["21CS01", "21CS02", "21CS03"]);

        let desc = ClearanceQuery {
            order: RollOrder::Desc,
            ..ClearanceQuery::default()
        }
        .apply(rows);
        assert_eq!(rolls(&desc), vec!["21CS03", "21CS02", "21CS01"]);
    }

    #[test]
    fn filters_by_roll_substring_and_exact_status() {
        let rows = vec![
            row("21CS01", ClearanceStatus::Accepted),
            row("21CS11", ClearanceStatus::Pending),
            row("21EC01", ClearanceStatus::Accepted),
        ];
        let query = ClearanceQuery {
            roll: Some(" cs ".into()),
            status: Some(ClearanceStatus::Accepted),
            order: RollOrder::Asc,
        };
        assert_eq!(rolls(&query.apply(rows.clone())), vec!["21CS01"]);

        let blank = ClearanceQuery {
            roll: Some("  ".into()),
            ..ClearanceQuery::default()
        };
        assert_eq!(blank.apply(rows).len(), 3);
    }

    #[test]
    fn status_filter_ignores_letter_case() {
        let query: ClearanceQuery =
            serde_json::from_value(serde_json::json!({ "status": "pending" })).unwrap();
        assert_eq!(query.status, Some(ClearanceStatus::Pending));
        let query: ClearanceQuery =
            serde_json::from_value(serde_json::json!({ "status": "REJECTED", "order": "desc" })).unwrap();
        assert_eq!(query.status, Some(ClearanceStatus::Rejected));
        assert_eq!(query.order, RollOrder::Desc);

        let blank: ClearanceQuery = serde_json::from_value(serde_json::json!({ "status": " " })).unwrap();
        assert_eq!(blank.status, None);
        let absent: ClearanceQuery = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(absent, ClearanceQuery::default());

        let bad = serde_json::from_value::<ClearanceQuery>(serde_json::json!({ "status": "done" }));
        assert!(bad.is_err());
    }

    #[test]
    fn rows_carry_display_names_with_fallbacks() {
        let partition = Partition::new(Year::III, Section::A);
        let courses = [Course {
            id: CourseId::new("c1"),
            partition,
            code: "CS301".into(),
            name: "Compilers".into(),
            instructor: Some(FacultyId::new("f5")),
            students: Vec::new(),
        }];
        let faculty = [
            Faculty {
                id: FacultyId::new("f5"),
                name: "Dr. Rao".into(),
                designation: None,
                roles: RoleSet::default(),
            },
            Faculty {
                id: FacultyId::new("f1"),
                name: "Dr. Iyer".into(),
                designation: None,
                roles: RoleSet {
                    coordinator: Some(CoordinatorRole {
                        category: "Class Coordinator".into(),
                    }),
                    ..RoleSet::default()
                },
            },
        ];
        let names = DisplayNames::new(&courses, &faculty);
        let student = StudentClearance {
            student_id: StudentId::new("s1"),
            roll_no: "21CS01".into(),
            name: "Asha".into(),
            courses: Vec::new(),
            courses_faculty: vec![
                InstructorApproval {
                    course_id: CourseId::new("c1"),
                    faculty_id: Some(FacultyId::new("f5")),
                    status: ClearanceStatus::Pending,
                },
                InstructorApproval {
                    course_id: CourseId::new("c2"),
                    faculty_id: None,
                    status: ClearanceStatus::Pending,
                },
            ],
            coordinators: vec![PartyApproval {
                faculty_id: FacultyId::new("f1"),
                status: ClearanceStatus::Accepted,
            }],
            mentors: Vec::new(),
        };

        let row = student_row(&student, &names);
        assert_eq!(row.approvals.len(), 3);
        assert_eq!(row.approvals[0].label, "Compilers");
        assert_eq!(row.approvals[0].authority.as_deref(), Some("Dr. Rao"));
        assert_eq!(row.approvals[1].label, "c2");
        assert_eq!(row.approvals[1].authority.as_deref(), Some(UNASSIGNED));
        assert_eq!(row.approvals[2].kind, PartyKind::Coordinator);
        assert_eq!(row.approvals[2].label, "Dr. Iyer");
        assert_eq!(row.approvals[2].authority.as_deref(), Some("Class Coordinator"));
    }
}
