pub mod assignment;
pub mod domain;
pub mod error;
pub mod generator;
pub mod memory;
pub mod ports;
pub mod roster;
pub mod tracker;
pub mod view;

pub use assignment::AssignmentService;
pub use domain::{
    ClearanceRecord, ClearanceStatus, Course, CourseId, Faculty, FacultyId, Partition, RecordId,
    RecordSummary, RoleSet, Section, StaffCredentials, StaffIdentity, Student, StudentClearance,
    StudentId, Year,
};
pub use error::{ClearanceError, ClearanceResult};
pub use generator::{ClearanceGenerator, ClearanceSelection};
pub use ports::{AccountStore, ClearanceStore, PortError, PortResult, RosterStore};
pub use roster::{Roster, RosterAggregator};
pub use tracker::{ClearanceTracker, TransitionOutcome, TransitionRequest};
pub use view::{ClearanceQuery, ClearanceView, PartyKind, RollOrder};
