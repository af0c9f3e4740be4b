//! Exam and image manifests
//!
//! [`MetaManager`] joins the image crosswalk with the optional exam manifest
//! and exposes the two views the trainer needs: a flat image list with
//! labels (single-view training) and a list of exams with both breasts
//! (multi-view training).

mod records;
mod tsv;

pub use records::{BreastImages, ExamClinical, ExamRecord, ImageRecord};
pub use tsv::{is_missing, TsvRow, TsvTable};

use crate::error::Result;
use crate::imaging::ImageExtension;
use crate::types::{Laterality, ViewCode};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

type ExamKey = (String, u32);

/// Resolves file paths and labels from the TSV manifests
#[derive(Debug, Clone)]
pub struct MetaManager {
    images: Vec<ImageRecord>,
    exams: Vec<ExamRecord>,
}

impl MetaManager {
    /// Reads the manifests from disk
    ///
    /// # Arguments
    ///
    /// * `exam_tsv` - Exam manifest; `None` derives breast labels from the images
    /// * `img_tsv` - Image crosswalk
    /// * `img_folder` - Directory holding the image files
    /// * `img_extension` - Extension substituted into crosswalk file names
    pub fn new(
        exam_tsv: Option<&Path>,
        img_tsv: &Path,
        img_folder: &Path,
        img_extension: ImageExtension,
    ) -> Result<Self> {
        let exam_table = exam_tsv.map(TsvTable::read).transpose()?;
        let img_table = TsvTable::read(img_tsv)?;
        Self::from_tables(exam_table.as_ref(), &img_table, img_folder, img_extension)
    }

    /// Builds the manager from already parsed tables
    pub fn from_tables(
        exam_table: Option<&TsvTable>,
        img_table: &TsvTable,
        img_folder: &Path,
        img_extension: ImageExtension,
    ) -> Result<Self> {
        let clinical = match exam_table {
            Some(table) => read_clinical(table)?,
            None => BTreeMap::new(),
        };

        let subject_col = img_table.require_column("subjectId")?;
        let exam_col = img_table.require_column("examIndex")?;
        let image_col = img_table.require_column("imageIndex")?;
        let view_col = img_table.require_column("view")?;
        let lat_col = img_table.require_column("laterality")?;
        let file_col = img_table.require_column("filename")?;
        let cancer_col = img_table.column("cancer");

        let mut images = Vec::with_capacity(img_table.rows().len());
        for row in img_table.rows() {
            let subject_id = img_table
                .value(row, Some(subject_col))
                .ok_or_else(|| img_table.error(row, "missing subjectId"))?
                .to_string();
            let exam_index = img_table
                .number::<u32>(row, Some(exam_col), "examIndex")?
                .ok_or_else(|| img_table.error(row, "missing examIndex"))?;
            let image_index = img_table
                .number::<u32>(row, Some(image_col), "imageIndex")?
                .unwrap_or(0);
            let filename = img_table
                .value(row, Some(file_col))
                .ok_or_else(|| img_table.error(row, "missing filename"))?;
            let laterality = Laterality::from_str(img_table.value(row, Some(lat_col)).unwrap_or(""));
            let view = ViewCode::parse(img_table.value(row, Some(view_col)).unwrap_or(""));

            let exam_cancer = clinical
                .get(&(subject_id.clone(), exam_index))
                .and_then(|c| c.cancer(laterality));
            let cancer = match img_table.label(row, cancer_col, "cancer")? {
                Some(label) => Some(label),
                None => exam_cancer,
            };

            images.push(ImageRecord {
                subject_id,
                exam_index,
                image_index,
                laterality,
                view,
                path: resolve_image_path(img_folder, filename, img_extension),
                cancer,
            });
        }
        images.sort_by(|a, b| {
            (&a.subject_id, a.exam_index, a.image_index).cmp(&(
                &b.subject_id,
                b.exam_index,
                b.image_index,
            ))
        });

        let exams = group_exams(&images, &clinical);
        info!(
            "Loaded {} images in {} exams from {}",
            images.len(),
            exams.len(),
            img_table.path().display()
        );

        Ok(Self { images, exams })
    }

    /// All crosswalk images, labeled or not
    pub fn images(&self) -> &[ImageRecord] {
        &self.images
    }

    /// All exams, complete or not
    pub fn exams(&self) -> &[ExamRecord] {
        &self.exams
    }

    /// Flat list of labeled image paths and their labels
    pub fn get_flatten_img_list(&self) -> (Vec<PathBuf>, Vec<u8>) {
        let mut paths = Vec::new();
        let mut labels = Vec::new();
        for image in &self.images {
            if let Some(label) = image.cancer {
                paths.push(image.path.clone());
                labels.push(label);
            }
        }
        let skipped = self.images.len() - paths.len();
        if skipped > 0 {
            warn!("Skipping {} images without a cancer label", skipped);
        }
        (paths, labels)
    }

    /// Exams with images and labels for both breasts
    pub fn get_flatten_exam_list(&self) -> Vec<ExamRecord> {
        let exams: Vec<ExamRecord> = self
            .exams
            .iter()
            .filter(|exam| exam.is_complete())
            .cloned()
            .collect();
        let skipped = self.exams.len() - exams.len();
        if skipped > 0 {
            warn!(
                "Skipping {} exams missing a breast or a label",
                skipped
            );
        }
        exams
    }

    /// Exam-level labels used for stratification
    ///
    /// Only meaningful for complete exams; incomplete ones count as negative.
    pub fn exam_labs(exams: &[ExamRecord]) -> Vec<u8> {
        exams.iter().map(|e| e.label().unwrap_or(0)).collect()
    }
}

/// Reads the exam manifest keyed by (subject, exam)
fn read_clinical(table: &TsvTable) -> Result<BTreeMap<ExamKey, ExamClinical>> {
    let subject_col = table.require_column("subjectId")?;
    let exam_col = table.require_column("examIndex")?;
    let cancer_l = table.column("cancerL");
    let cancer_r = table.column("cancerR");
    let inv_l = table.column("invL");
    let inv_r = table.column("invR");
    let age = table.column("age");
    let implant_now = table.column("implantNow");

    let mut clinical = BTreeMap::new();
    for row in table.rows() {
        let subject_id = table
            .value(row, Some(subject_col))
            .ok_or_else(|| table.error(row, "missing subjectId"))?
            .to_string();
        let exam_index = table
            .number::<u32>(row, Some(exam_col), "examIndex")?
            .ok_or_else(|| table.error(row, "missing examIndex"))?;
        let record = ExamClinical {
            cancer_l: table.label(row, cancer_l, "cancerL")?,
            cancer_r: table.label(row, cancer_r, "cancerR")?,
            inv_l: table.label(row, inv_l, "invL")?,
            inv_r: table.label(row, inv_r, "invR")?,
            age: table.number::<f32>(row, age, "age")?,
            implant_now: table.label(row, implant_now, "implantNow")?,
        };
        if clinical.insert((subject_id, exam_index), record).is_some() {
            return Err(table.error(row, "duplicate exam"));
        }
    }
    Ok(clinical)
}

fn group_exams(
    images: &[ImageRecord],
    clinical: &BTreeMap<ExamKey, ExamClinical>,
) -> Vec<ExamRecord> {
    let mut grouped: BTreeMap<ExamKey, ExamRecord> = BTreeMap::new();
    let mut image_labels: BTreeMap<(ExamKey, Laterality), Option<u8>> = BTreeMap::new();

    for image in images {
        let key = (image.subject_id.clone(), image.exam_index);
        let exam = grouped.entry(key.clone()).or_insert_with(|| ExamRecord {
            subject_id: image.subject_id.clone(),
            exam_index: image.exam_index,
            left: BreastImages::default(),
            right: BreastImages::default(),
            clinical: clinical.get(&key).cloned(),
        });
        let breast = match image.laterality {
            Laterality::Left => &mut exam.left,
            Laterality::Right => &mut exam.right,
            Laterality::Unknown => {
                debug!("Ignoring image without laterality: {}", image.path.display());
                continue;
            }
        };
        if image.view.position.is_cc_like() {
            breast.cc.push(image.path.clone());
        } else if image.view.position.is_mlo_like() {
            breast.mlo.push(image.path.clone());
        } else {
            debug!(
                "Ignoring {} view in exam mode: {}",
                image.view,
                image.path.display()
            );
        }

        let label = image_labels
            .entry((key, image.laterality))
            .or_insert(None);
        if let Some(cancer) = image.cancer {
            *label = Some(label.map_or(cancer, |l| l.max(cancer)));
        }
    }

    grouped
        .into_iter()
        .map(|(key, mut exam)| {
            for laterality in [Laterality::Left, Laterality::Right] {
                let from_images = image_labels
                    .get(&(key.clone(), laterality))
                    .copied()
                    .flatten();
                let from_exam = exam.clinical.as_ref().and_then(|c| c.cancer(laterality));
                let breast = match laterality {
                    Laterality::Left => &mut exam.left,
                    _ => &mut exam.right,
                };
                breast.cancer = from_exam.or(from_images);
            }
            exam
        })
        .collect()
}

/// Maps a crosswalk file name to the image on disk
///
/// The stem is everything before the first `.`, so `dir/123.dcm.gz` with
/// extension `png` resolves to `<folder>/dir/123.png`.
pub fn resolve_image_path(folder: &Path, filename: &str, extension: ImageExtension) -> PathBuf {
    let relative = Path::new(filename);
    let name = relative
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(filename);
    let stem = name.split('.').next().unwrap_or(name);
    let file = format!("{}.{}", stem, extension.as_str());
    match relative.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => folder.join(parent).join(file),
        _ => folder.join(file),
    }
}
