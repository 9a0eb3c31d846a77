pub mod classes;
pub mod symptoms;
pub mod summary;
pub mod form;

pub use classes::{TbClass, CLASS_NAMES, NUM_CLASSES};
pub use symptoms::{SymptomChecklist, SymptomEntry, SYMPTOM_NAMES};
pub use summary::{Consultation, DiagnosisSummary, Prediction};
pub use form::{DiagnosisForm, FormError, FormSnapshot, FormState, XrayClassifier};
