/**
 * CONFIG API - Paramètres du serveur de consultation
 *
 * RÔLE : Tout vient de l'environnement (.env supporté via dotenvy),
 * le serveur API n'a pas de fichier de config propre : il ne fait que
 * lire le journal TSV et le fichier de statut écrits par le collector.
 */

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub log_file: PathBuf,
    pub status_file: PathBuf,
    pub port: u16,
    /// Nombre de lignes gardées en cache mémoire.
    pub cache_lines: usize,
    /// Nombre d'événements de changement retournés au maximum.
    pub change_retention: usize,
}

pub fn load_config() -> ApiConfig {
    let log_file = std::env::var("RELAYWATCH_LOG_FILE")
        .unwrap_or_else(|_| "./logs/relaywatch.tsv".to_string());
    let status_file = std::env::var("RELAYWATCH_STATUS_FILE")
        .unwrap_or_else(|_| "./logs/collector_status.json".to_string());
    let port = std::env::var("RELAYWATCH_API_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8080);

    ApiConfig {
        log_file: PathBuf::from(log_file),
        status_file: PathBuf::from(status_file),
        port,
        cache_lines: 1000,
        change_retention: relaywatch_core::changes::DEFAULT_RETAINED,
    }
}
