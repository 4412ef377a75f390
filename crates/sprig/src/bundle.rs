// Model bundle: a quantized model and its image collections in one JSON file
//
//   {
//     "model": { "arch": {...}, "conv": [...], "dense": [...] },
//     "train": { "shape": [C, H, W], "q": Q, "images": [[...]], "labels": [...] },
//     "test":  { ... }
//   }
//
// Deserialization bypasses the constructors, so `load` re-validates every
// tensor and collection before handing the bundle out.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use sprig_core::Result;
use sprig_data::LabeledImages;

use crate::model::QuantizedModel;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    pub model: QuantizedModel,
    pub train: LabeledImages,
    pub test: LabeledImages,
}

impl ModelBundle {
    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        let classes = self.model.classes();
        for set in [&self.train, &self.test] {
            set.validate()?;
            set.check_labels(classes)?;
        }
        Ok(())
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let bundle: ModelBundle = serde_json::from_reader(reader)?;
        bundle.validate()?;
        Ok(bundle)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut w, self)?;
        w.flush()?;
        Ok(())
    }
}
