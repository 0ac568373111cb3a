/**
 * CACHE LOG - Lecture du journal TSV écrit par le collector
 *
 * RÔLE : Garde en mémoire les N derniers samples parsés. Rechargé à
 * chaque requête API : le fichier est la seule ressource partagée avec
 * le collector, et son writer garantit qu'une ligne est soit complète
 * soit invisible, donc la lecture ne bloque jamais l'écriture.
 *
 * UTILITÉ : Répondre vite aux requêtes dashboard sans relire tout le
 * fichier (on ne parse que la queue) et savoir quand les données ont
 * été lues pour la dernière fois (fraîcheur côté /api/health).
 */

use relaywatch_core::sample::Sample;
use relaywatch_core::store::{SampleStore, StoreError};
use std::path::PathBuf;
use time::OffsetDateTime;

pub struct LogCache {
    log_file: PathBuf,
    max_lines: usize,
    samples: Vec<Sample>,
    last_read: Option<OffsetDateTime>,
}

impl LogCache {
    pub fn new(log_file: impl Into<PathBuf>, max_lines: usize) -> Self {
        Self {
            log_file: log_file.into(),
            max_lines,
            samples: Vec::new(),
            last_read: None,
        }
    }

    /// Recharge la queue du journal. Un fichier absent n'est pas une
    /// erreur : le collector n'a peut-être pas encore démarré.
    pub fn reload(&mut self) -> Result<(), StoreError> {
        if !self.log_file.exists() {
            self.samples.clear();
            return Ok(());
        }
        self.samples = SampleStore::read_tail(&self.log_file, self.max_lines)?;
        self.last_read = Some(OffsetDateTime::now_utc());
        Ok(())
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.last()
    }

    /// Les `count` derniers samples, du plus ancien au plus récent.
    pub fn recent(&self, count: usize) -> &[Sample] {
        let start = self.samples.len().saturating_sub(count);
        &self.samples[start..]
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn last_read(&self) -> Option<OffsetDateTime> {
        self.last_read
    }

    pub fn log_file_exists(&self) -> bool {
        self.log_file.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn reloads_tail_of_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.tsv");
        let store = SampleStore::open(&path, vec![]).unwrap();
        for i in 0..10 {
            let ts = datetime!(2025-06-01 12:00:00 UTC) + time::Duration::seconds(5 * i);
            let mut s = Sample::empty(ts, "8.8.8.8");
            s.ping.success = true;
            s.ping.latency_ms = Some(10 + i as u32);
            store.append(&s).unwrap();
        }

        let mut cache = LogCache::new(&path, 4);
        cache.reload().unwrap();
        assert_eq!(cache.len(), 4);
        // the newest sample is the last one written
        assert_eq!(cache.latest().unwrap().ping.latency_ms, Some(19));
        assert_eq!(cache.recent(2).len(), 2);
        assert!(cache.last_read().is_some());
    }

    #[test]
    fn missing_log_is_empty_not_an_error() {
        let mut cache = LogCache::new("/nonexistent/never/log.tsv", 100);
        cache.reload().unwrap();
        assert!(cache.is_empty());
        assert!(!cache.log_file_exists());
    }
}
