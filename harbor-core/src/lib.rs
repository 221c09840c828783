pub mod appointment;
pub mod assistant;
pub mod dea222;
pub mod error;
pub mod outcome;
pub mod patch;
pub mod patient;
pub mod pdmp;
pub mod prescription;
pub mod record;
pub mod reminder;
pub mod study;
pub mod take_home;
pub mod validation;

pub use appointment::{Appointment, AppointmentPatch, AppointmentStatus, NewAppointment};
pub use dea222::{Dea222Order, Dea222Patch, NewDea222Order, OrderStatus, Receipt};
pub use error::{HarborError, Result};
pub use outcome::{IssueCode, Outcome};
pub use patient::{NewPatient, Patient, PatientPatch};
pub use pdmp::{NewPdmpLookup, PdmpLookup, PdmpStatus};
pub use prescription::{
    DrugSchedule, NewPrescription, Prescription, PrescriptionPatch, PrescriptionStatus,
};
pub use record::{Record, RecordMeta, COLLECTIONS};
pub use reminder::{NewReminder, Reminder, ReminderPatch, ReminderStatus};
pub use study::{Adjustment, IrbStatus, Study, StudyPatch, StudyStatus, StudyUpdate};
pub use take_home::{DispenseContext, NewTakeHome, ReturnCheck, TakeHome, TakeHomeStatus};
