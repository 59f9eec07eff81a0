#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use invoice_intake::export::{SageExporter, SagePayload};
use invoice_intake::extraction::{ExtractedField, ExtractionResult, Extractor, SimulatedExtractor};
use invoice_intake::models::FieldKey;
use invoice_intake::{
    InvoiceError, InvoiceRepository, InvoiceResult, LifecycleManager, LifecycleOptions, MemoryStore,
    StorageGateway, UploadedFile,
};

/// Extractor returning a fixed result, or failing while `fail` is set.
pub struct ScriptedExtractor {
    pub result: ExtractionResult,
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
}

impl ScriptedExtractor {
    pub fn new(result: ExtractionResult) -> Self {
        ScriptedExtractor {
            result,
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn analyze(&self, _document_url: &str) -> InvoiceResult<ExtractionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(InvoiceError::Extraction("scripted failure".to_string()));
        }
        Ok(self.result.clone())
    }
}

/// Exporter that records what it was given.
#[derive(Default)]
pub struct RecordingExporter {
    pub submitted: std::sync::Mutex<Vec<(SagePayload, String)>>,
    pub fail: AtomicBool,
}

impl RecordingExporter {
    pub fn submissions(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }
}

#[async_trait]
impl SageExporter for RecordingExporter {
    async fn submit(&self, payload: &SagePayload, idempotency_key: &str) -> InvoiceResult<String> {
        self.submitted
            .lock()
            .unwrap()
            .push((payload.clone(), idempotency_key.to_string()));
        if self.fail.load(Ordering::SeqCst) {
            return Err(InvoiceError::Export("Sage unavailable".to_string()));
        }
        Ok("accepted".to_string())
    }
}

pub struct Harness {
    pub manager: LifecycleManager,
    pub repo: InvoiceRepository,
    pub store: Arc<MemoryStore>,
    pub extractor: Arc<ScriptedExtractor>,
    pub exporter: Arc<RecordingExporter>,
}

pub fn edf_extraction() -> ExtractionResult {
    let mut result = ExtractionResult::default();
    let fields = [
        (FieldKey::InvoiceNumber, ExtractedField::new("F-2024-0042", 0.94)),
        (FieldKey::Date, ExtractedField::new("15/03/2024", 0.96)),
        (FieldKey::DueDate, ExtractedField::new("14/04/2024", 0.91)),
        (FieldKey::Supplier, ExtractedField::new("E.D.F", 0.62)),
        (FieldKey::TotalAmount, ExtractedField::new("294,00 €", 0.95)),
        (FieldKey::TaxAmount, ExtractedField::new("49,00", 0.92)),
        (FieldKey::Reference, ExtractedField::new("REF-5521", 0.88)),
        (FieldKey::Description, ExtractedField::new("Électricité mars", 0.76)),
    ];
    result.fields.extend(fields);
    result.raw_text = Some("EDF facture".to_string());
    result
}

pub async fn harness(options: LifecycleOptions) -> Harness {
    harness_with(options, edf_extraction()).await
}

pub async fn harness_with(options: LifecycleOptions, extraction: ExtractionResult) -> Harness {
    let repo = InvoiceRepository::in_memory().await.expect("in-memory database");
    let store = Arc::new(MemoryStore::default());
    let storage = StorageGateway::new(store.clone(), options.max_upload_size);
    let extractor = Arc::new(ScriptedExtractor::new(extraction));
    let exporter = Arc::new(RecordingExporter::default());
    let manager = LifecycleManager::new(
        repo.clone(),
        storage,
        extractor.clone(),
        exporter.clone(),
        options,
    );
    Harness {
        manager,
        repo,
        store,
        extractor,
        exporter,
    }
}

/// Lifecycle wired to the simulated collaborators with no delay.
pub async fn simulated_manager() -> LifecycleManager {
    let repo = InvoiceRepository::in_memory().await.expect("in-memory database");
    let storage = StorageGateway::new(Arc::new(MemoryStore::default()), invoice_intake::storage::MAX_FILE_SIZE);
    LifecycleManager::new(
        repo,
        storage,
        Arc::new(SimulatedExtractor::new(Duration::ZERO)),
        Arc::new(invoice_intake::export::SimulatedSageExporter::new(Duration::ZERO)),
        LifecycleOptions::default(),
    )
}

pub fn pdf(name: &str, size: usize) -> UploadedFile {
    UploadedFile::new(Some(name.to_string()), "application/pdf", vec![0x25u8; size])
}
