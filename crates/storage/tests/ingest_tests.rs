// Ingest pipeline tests: stage -> verify -> append against real files.
// Covers the offset/content consistency guarantees under failure.

mod common;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use common::{FlakyByteStore, seeded_bytes, sha256_hash, stage_bytes};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tempfile::TempDir;
use tusk_core::{ChecksumAlgorithm, Upload, UploadChecksum, UploadMetadata, UploadState};
use tusk_storage::{
    AppendEngine, ByteStore, ChecksumVerifier, ChunkStager, FilesystemByteStore, StorageError,
};

struct Pipeline {
    _dir: TempDir,
    store: Arc<FlakyByteStore>,
    stager: ChunkStager,
    verifier: ChecksumVerifier,
    engine: AppendEngine,
}

async fn pipeline() -> Pipeline {
    let dir = TempDir::new().unwrap();
    let inner = FilesystemByteStore::new(dir.path().join("objects"))
        .await
        .unwrap();
    let store = FlakyByteStore::new(inner);
    let stager = ChunkStager::new(dir.path().join("staging"), 64 * 1024)
        .await
        .unwrap();
    let verifier = ChecksumVerifier::new(vec![ChecksumAlgorithm::Sha1, ChecksumAlgorithm::Sha256]);
    let engine = AppendEngine::new(store.clone());
    Pipeline {
        _dir: dir,
        store,
        stager,
        verifier,
        engine,
    }
}

async fn start_upload(store: &dyn ByteStore, length: Option<u64>) -> Upload {
    let mut upload = Upload::create(length, UploadMetadata::default(), None);
    let key = upload.id().to_string();
    store.create(&key).await.unwrap();
    upload.begin_receiving(key).unwrap();
    upload
}

fn staging_is_empty(stager: &ChunkStager) -> bool {
    std::fs::read_dir(stager.dir()).unwrap().next().is_none()
}

#[tokio::test]
async fn test_many_chunks_reassemble_exactly() {
    let p = pipeline().await;
    let content = seeded_bytes(7, 100_000);
    let mut upload = start_upload(p.store.as_ref(), Some(content.len() as u64)).await;

    let mut offset = 0usize;
    for size in [1, 4095, 30_000, 17, 50_000, 15_887] {
        let piece = content.slice(offset..offset + size);
        let checksum = UploadChecksum {
            algorithm: "sha256".to_string(),
            digest: STANDARD.encode(ChecksumAlgorithm::Sha256.digest(&piece)),
        };

        let chunk = stage_bytes(&p.stager, piece).await;
        p.verifier.verify(&checksum, &chunk).await.unwrap();
        upload.begin_saving().unwrap();
        let new_offset = p.engine.append(&mut upload, chunk).await.unwrap();

        offset += size;
        assert_eq!(new_offset, offset as u64);
    }

    assert_eq!(upload.state(), UploadState::Done);
    let stored = p.store.read(&upload.id().to_string()).await.unwrap();
    assert_eq!(sha256_hash(&stored), sha256_hash(&content));
    assert!(staging_is_empty(&p.stager));
}

#[tokio::test]
async fn test_checksum_mismatch_leaves_offset_and_object() {
    let p = pipeline().await;
    let mut upload = start_upload(p.store.as_ref(), Some(8)).await;
    let key = upload.id().to_string();

    let checksum = UploadChecksum {
        algorithm: "sha1".to_string(),
        digest: STANDARD.encode(ChecksumAlgorithm::Sha1.digest(b"something else")),
    };
    let chunk = stage_bytes(&p.stager, Bytes::from_static(b"abcd")).await;
    let result = p.verifier.verify(&checksum, &chunk).await;
    assert!(matches!(result, Err(StorageError::ChecksumMismatch { .. })));
    chunk.discard().await.unwrap();

    assert_eq!(upload.upload_offset(), 0);
    assert_eq!(p.store.size(&key).await.unwrap(), 0);
    assert!(staging_is_empty(&p.stager));

    // The same chunk with the right digest still goes through.
    let checksum = UploadChecksum {
        algorithm: "sha1".to_string(),
        digest: STANDARD.encode(ChecksumAlgorithm::Sha1.digest(b"abcd")),
    };
    let chunk = stage_bytes(&p.stager, Bytes::from_static(b"abcd")).await;
    p.verifier.verify(&checksum, &chunk).await.unwrap();
    upload.begin_saving().unwrap();
    assert_eq!(p.engine.append(&mut upload, chunk).await.unwrap(), 4);
}

#[tokio::test]
async fn test_failed_append_rolls_back_torn_tail() {
    let p = pipeline().await;
    let mut upload = start_upload(p.store.as_ref(), Some(12)).await;
    let key = upload.id().to_string();

    upload.begin_saving().unwrap();
    let chunk = stage_bytes(&p.stager, Bytes::from_static(b"good")).await;
    p.engine.append(&mut upload, chunk).await.unwrap();

    p.store.set_failing(true);
    upload.begin_saving().unwrap();
    let chunk = stage_bytes(&p.stager, Bytes::from_static(b"torn")).await;
    assert!(matches!(
        p.engine.append(&mut upload, chunk).await,
        Err(StorageError::Io(_))
    ));

    assert_eq!(upload.state(), UploadState::Receiving);
    assert_eq!(upload.upload_offset(), 4);
    assert_eq!(p.store.size(&key).await.unwrap(), 4);
    assert_eq!(p.store.truncations.load(Ordering::SeqCst), 1);
    assert!(staging_is_empty(&p.stager));

    p.store.set_failing(false);
    upload.begin_saving().unwrap();
    let chunk = stage_bytes(&p.stager, Bytes::from_static(b"rest of it")).await;
    assert!(p.engine.append(&mut upload, chunk).await.is_err());
    upload.begin_saving().unwrap();
    let chunk = stage_bytes(&p.stager, Bytes::from_static(b"more_ok!")).await;
    assert_eq!(p.engine.append(&mut upload, chunk).await.unwrap(), 12);

    assert_eq!(
        p.store.read(&key).await.unwrap(),
        Bytes::from_static(b"goodmore_ok!")
    );
}
