use crate::classifier::Classifier;
use crate::config::Config;
use crate::store::{RecordStore, StoreError};

/// Everything one invocation works with. Built once at start-up and
/// closed explicitly so the store is flushed.
pub struct Session {
    pub config: Config,
    pub store: RecordStore,
    pub classifier: Classifier,
}

impl Session {
    pub fn open(config: Config) -> Result<Self, StoreError> {
        let store = RecordStore::open(config.data_dir())?;
        let classifier = Classifier::new(&config);
        if config.gemini_api_key.trim().is_empty() {
            log::warn!("No Gemini API key set; analyses will use the safe default result");
        }
        Ok(Self {
            config,
            store,
            classifier,
        })
    }

    pub fn close(self) -> Result<(), StoreError> {
        self.store.close()
    }
}
