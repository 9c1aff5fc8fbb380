use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use super::caf::Caf;
use super::grant::{FolioGrant, GrantStore};
use super::FolioError;
use crate::core::Rut;

/// A successfully retrieved folio together with the CAF that authorizes
/// it. The grant was recorded before this value existed: treat it as
/// consumed even if the document is never issued.
#[derive(Debug, Clone)]
pub struct CafGrant {
    pub issuer: Rut,
    pub type_code: u16,
    pub folio: u64,
    pub caf: Caf,
}

/// Hands out unused folios from loaded CAF ranges.
///
/// Retrieval serializes per (issuer, document type) pair around the
/// compute-next/record-grant step; different pairs do not contend. The
/// grant is durable in the [`GrantStore`] before the folio is returned,
/// so a crash between recording and consumption can never produce a
/// duplicate on retry.
pub struct FolioAuthority {
    cafs: Mutex<HashMap<(Rut, u16), Vec<Caf>>>,
    key_locks: Mutex<HashMap<(Rut, u16), Arc<Mutex<()>>>>,
    store: Arc<dyn GrantStore>,
    accept_synthetic: bool,
}

impl FolioAuthority {
    /// Authority accepting only authority-issued CAFs.
    pub fn new(store: Arc<dyn GrantStore>) -> Self {
        Self {
            cafs: Mutex::new(HashMap::new()),
            key_locks: Mutex::new(HashMap::new()),
            store,
            accept_synthetic: false,
        }
    }

    /// Also accept [`Caf::synthesize`]d CAFs. Reference and testing use
    /// only; production deployments must not enable this.
    pub fn accepting_synthetic(mut self) -> Self {
        self.accept_synthetic = true;
        self
    }

    /// Load a CAF. Several CAFs may be loaded for the same pair; ranges
    /// are consulted in load order.
    pub fn load_caf(&self, caf: Caf) {
        lock(&self.cafs)
            .entry((caf.issuer, caf.type_code))
            .or_default()
            .push(caf);
    }

    /// Retrieve a folio for the pair.
    ///
    /// With `folio` omitted, the next unused value is `last granted + 1`,
    /// starting at 1 when nothing was granted yet. An explicit folio also
    /// re-seeds the sequence: the next implicit grant continues from the
    /// highest folio ever granted.
    pub fn retrieve(
        &self,
        issuer: Rut,
        type_code: u16,
        folio: Option<u64>,
    ) -> Result<CafGrant, FolioError> {
        let key = (issuer, type_code);
        let key_lock = self.key_lock(key);
        let _serialized = lock(&key_lock);

        let candidates = lock(&self.cafs).get(&key).cloned().unwrap_or_default();
        if candidates.is_empty() {
            return Err(FolioError::CafInvalid {
                issuer,
                type_code,
                reason: "no CAF loaded for this issuer and document type".into(),
            });
        }

        let folio = match folio {
            Some(explicit) => explicit,
            None => self.store.last_granted(issuer, type_code)?.map_or(1, |last| last + 1),
        };

        let caf = match candidates.iter().find(|caf| caf.contains(folio)) {
            Some(caf) => caf,
            None => {
                // Report against the furthest-reaching range.
                let widest = candidates
                    .iter()
                    .max_by_key(|caf| caf.range_end)
                    .unwrap_or(&candidates[0]);
                return Err(FolioError::FolioExhausted {
                    issuer,
                    type_code,
                    folio,
                    start: widest.range_start,
                    end: widest.range_end,
                });
            }
        };

        self.check_caf(caf)?;

        if self.store.is_granted(issuer, type_code, folio)? {
            return Err(FolioError::AlreadyGranted {
                issuer,
                type_code,
                folio,
            });
        }

        // Durable before the folio leaves this function.
        self.store.record(&FolioGrant {
            issuer,
            type_code,
            folio,
            granted_at: Utc::now(),
        })?;

        Ok(CafGrant {
            issuer,
            type_code,
            folio,
            caf: caf.clone(),
        })
    }

    fn check_caf(&self, caf: &Caf) -> Result<(), FolioError> {
        let invalid = |reason: String| FolioError::CafInvalid {
            issuer: caf.issuer,
            type_code: caf.type_code,
            reason,
        };

        if caf.synthetic && !self.accept_synthetic {
            return Err(invalid(
                "synthesized CAF rejected; only authority-issued CAFs are accepted".into(),
            ));
        }
        caf.verify().map_err(invalid)?;
        if caf.is_expired(Utc::now().date_naive()) {
            return Err(invalid(format!(
                "authorization lapsed on {}",
                caf.expires_on
            )));
        }
        Ok(())
    }

    fn key_lock(&self, key: (Rut, u16)) -> Arc<Mutex<()>> {
        lock(&self.key_locks).entry(key).or_default().clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::folio::MemoryGrantStore;

    fn rut() -> Rut {
        "76192083-9".parse().unwrap()
    }

    fn authority() -> FolioAuthority {
        let authority =
            FolioAuthority::new(Arc::new(MemoryGrantStore::new())).accepting_synthetic();
        authority.load_caf(Caf::synthesize(rut(), 33, 1, 5));
        authority
    }

    #[test]
    fn implicit_retrieval_is_sequential() {
        let authority = authority();
        for expected in 1..=5u64 {
            let grant = authority.retrieve(rut(), 33, None).unwrap();
            assert_eq!(grant.folio, expected);
        }
    }

    #[test]
    fn range_exhaustion() {
        let authority = authority();
        for _ in 1..=5 {
            authority.retrieve(rut(), 33, None).unwrap();
        }
        assert!(matches!(
            authority.retrieve(rut(), 33, None),
            Err(FolioError::FolioExhausted { folio: 6, .. })
        ));
    }

    #[test]
    fn explicit_folio_outside_range() {
        let authority = authority();
        assert!(matches!(
            authority.retrieve(rut(), 33, Some(80)),
            Err(FolioError::FolioExhausted {
                folio: 80,
                start: 1,
                end: 5,
                ..
            })
        ));
    }

    #[test]
    fn explicit_folio_reseeds_sequence() {
        let authority = authority();
        authority.retrieve(rut(), 33, Some(3)).unwrap();
        let next = authority.retrieve(rut(), 33, None).unwrap();
        assert_eq!(next.folio, 4);
    }

    #[test]
    fn duplicate_explicit_folio_rejected() {
        let authority = authority();
        authority.retrieve(rut(), 33, Some(2)).unwrap();
        assert!(matches!(
            authority.retrieve(rut(), 33, Some(2)),
            Err(FolioError::AlreadyGranted { folio: 2, .. })
        ));
    }

    #[test]
    fn missing_caf_is_invalid() {
        let authority = authority();
        assert!(matches!(
            authority.retrieve(rut(), 39, None),
            Err(FolioError::CafInvalid { type_code: 39, .. })
        ));
    }

    #[test]
    fn synthetic_caf_rejected_by_default() {
        let strict = FolioAuthority::new(Arc::new(MemoryGrantStore::new()));
        strict.load_caf(Caf::synthesize(rut(), 33, 1, 10));
        assert!(matches!(
            strict.retrieve(rut(), 33, None),
            Err(FolioError::CafInvalid { .. })
        ));
    }

    #[test]
    fn expired_caf_rejected() {
        let authority = FolioAuthority::new(Arc::new(MemoryGrantStore::new())).accepting_synthetic();
        let mut caf = Caf::synthesize(rut(), 33, 1, 10);
        caf.authorized_on = chrono::NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        caf.expires_on = chrono::NaiveDate::from_ymd_opt(2020, 7, 1).unwrap();
        authority.load_caf(caf);
        assert!(matches!(
            authority.retrieve(rut(), 33, None),
            Err(FolioError::CafInvalid { .. })
        ));
    }

    #[test]
    fn pairs_do_not_share_sequences() {
        let authority = authority();
        authority.load_caf(Caf::synthesize(rut(), 61, 1, 5));
        assert_eq!(authority.retrieve(rut(), 33, None).unwrap().folio, 1);
        assert_eq!(authority.retrieve(rut(), 61, None).unwrap().folio, 1);
        assert_eq!(authority.retrieve(rut(), 33, None).unwrap().folio, 2);
    }
}
