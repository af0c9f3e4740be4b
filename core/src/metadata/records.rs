use crate::types::{Laterality, ViewCode};
use std::path::PathBuf;

/// One row of the image crosswalk with its resolved file path
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    pub subject_id: String,
    pub exam_index: u32,
    pub image_index: u32,
    pub laterality: Laterality,
    pub view: ViewCode,
    pub path: PathBuf,
    /// Resolved cancer label, `None` when unknown
    pub cancer: Option<u8>,
}

/// Clinical fields from the exam manifest
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExamClinical {
    pub cancer_l: Option<u8>,
    pub cancer_r: Option<u8>,
    pub inv_l: Option<u8>,
    pub inv_r: Option<u8>,
    pub age: Option<f32>,
    pub implant_now: Option<u8>,
}

impl ExamClinical {
    /// Cancer label of one breast
    pub fn cancer(&self, laterality: Laterality) -> Option<u8> {
        match laterality {
            Laterality::Left => self.cancer_l,
            Laterality::Right => self.cancer_r,
            Laterality::Unknown => None,
        }
    }
}

/// Images of one breast within an exam
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BreastImages {
    /// CC-like acquisitions (CC, XCCL, XCCM)
    pub cc: Vec<PathBuf>,
    /// MLO-like acquisitions (MLO, ML, LMO, LM)
    pub mlo: Vec<PathBuf>,
    pub cancer: Option<u8>,
}

impl BreastImages {
    pub fn is_empty(&self) -> bool {
        self.cc.is_empty() && self.mlo.is_empty()
    }

    /// CC candidates, falling back to the MLO images when no CC exists
    pub fn cc_or_fallback(&self) -> &[PathBuf] {
        if self.cc.is_empty() {
            &self.mlo
        } else {
            &self.cc
        }
    }

    /// MLO candidates, falling back to the CC images when no MLO exists
    pub fn mlo_or_fallback(&self) -> &[PathBuf] {
        if self.mlo.is_empty() {
            &self.cc
        } else {
            &self.mlo
        }
    }
}

/// One exam: both breasts of a subject at one visit
#[derive(Debug, Clone, PartialEq)]
pub struct ExamRecord {
    pub subject_id: String,
    pub exam_index: u32,
    pub left: BreastImages,
    pub right: BreastImages,
    pub clinical: Option<ExamClinical>,
}

impl ExamRecord {
    pub fn breast(&self, laterality: Laterality) -> Option<&BreastImages> {
        match laterality {
            Laterality::Left => Some(&self.left),
            Laterality::Right => Some(&self.right),
            Laterality::Unknown => None,
        }
    }

    /// Exam label: positive if either breast is
    pub fn label(&self) -> Option<u8> {
        match (self.left.cancer, self.right.cancer) {
            (Some(l), Some(r)) => Some(l.max(r)),
            _ => None,
        }
    }

    /// Both breasts carry images and labels
    pub fn is_complete(&self) -> bool {
        !self.left.is_empty() && !self.right.is_empty() && self.label().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breast(cc: &[&str], mlo: &[&str], cancer: Option<u8>) -> BreastImages {
        BreastImages {
            cc: cc.iter().map(PathBuf::from).collect(),
            mlo: mlo.iter().map(PathBuf::from).collect(),
            cancer,
        }
    }

    #[test]
    fn test_view_fallback() {
        let b = breast(&[], &["m.png"], Some(0));
        assert_eq!(b.cc_or_fallback(), &[PathBuf::from("m.png")]);
        assert_eq!(b.mlo_or_fallback(), &[PathBuf::from("m.png")]);

        let b = breast(&["c.png"], &["m.png"], Some(0));
        assert_eq!(b.cc_or_fallback(), &[PathBuf::from("c.png")]);
        assert_eq!(b.mlo_or_fallback(), &[PathBuf::from("m.png")]);
    }

    #[test]
    fn test_exam_label_and_completeness() {
        let exam = ExamRecord {
            subject_id: "1".to_string(),
            exam_index: 1,
            left: breast(&["a"], &["b"], Some(0)),
            right: breast(&["c"], &[], Some(1)),
            clinical: None,
        };
        assert_eq!(exam.label(), Some(1));
        assert!(exam.is_complete());

        let missing = ExamRecord {
            right: breast(&[], &[], Some(0)),
            ..exam.clone()
        };
        assert!(!missing.is_complete());

        let unlabeled = ExamRecord {
            left: breast(&["a"], &["b"], None),
            ..exam
        };
        assert_eq!(unlabeled.label(), None);
        assert!(!unlabeled.is_complete());
    }

    #[test]
    fn test_clinical_cancer_by_side() {
        let clinical = ExamClinical {
            cancer_l: Some(1),
            cancer_r: Some(0),
            ..Default::default()
        };
        assert_eq!(clinical.cancer(Laterality::Left), Some(1));
        assert_eq!(clinical.cancer(Laterality::Right), Some(0));
        assert_eq!(clinical.cancer(Laterality::Unknown), None);
    }
}
