//! End-to-end update scenarios: publish with the host-side codec, then
//! drive the device-side machine through stage, confirm, and rollback.

use flashwave::ota::envelope::{self, OtaKey};
use flashwave::ota::fetch::{Fetcher, RetryPolicy};
use flashwave::ota::health::{BootGuard, HealthMarker, HealthVerdict};
use flashwave::ota::machine::{BootOutcome, CycleOutcome, UpdateMachine};
use flashwave::ota::slots::{FileSlotBank, SlotBank, SlotId};
use flashwave::ota::store::MemoryBlobStore;
use flashwave::ota::version::FirmwareVersion;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const CAPACITY: u64 = 64 * 1024;

fn shared_key() -> OtaKey {
    let mut bytes = [0u8; 32];
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = (i * 11 + 5) as u8;
    }
    OtaKey::from_bytes(bytes)
}

fn v(s: &str) -> FirmwareVersion {
    s.parse().unwrap()
}

/// What the host tool does: encrypt the image and replace the descriptor.
fn publish_release(store: &MemoryBlobStore, version: &str, image: &[u8]) {
    let blob_id = format!("{version}.enc");
    store.put(blob_id.clone(), envelope::encrypt(image, &shared_key()));
    store.put("latest.txt", format!("{version},{blob_id}").into_bytes());
}

/// Seed slot A with the image the device shipped with.
fn seed_factory_image(dir: &Path) {
    let mut bank = FileSlotBank::open(dir.join("slots"), CAPACITY).unwrap();
    bank.write_image(SlotId::A, b"firmware image v1.0.0").unwrap();
}

fn boot_device(
    dir: &Path,
    store: Arc<MemoryBlobStore>,
) -> UpdateMachine<Arc<MemoryBlobStore>, FileSlotBank> {
    let retry = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
    };
    let fetcher = Fetcher::new(store, "latest.txt", shared_key()).with_retry(retry);
    let bank = FileSlotBank::open(dir.join("slots"), CAPACITY).unwrap();
    UpdateMachine::new(fetcher, bank, dir.join("state.json"), v("1.0.0"), 3).unwrap()
}

#[tokio::test]
async fn update_is_staged_and_confirmed_end_to_end() {
    let device = TempDir::new().unwrap();
    seed_factory_image(device.path());
    let store = Arc::new(MemoryBlobStore::new());
    publish_release(&store, "1.1.0", b"firmware image v1.1.0");

    // Device running 1.0.0 finds the update and stages it into slot B.
    {
        let mut machine = boot_device(device.path(), store.clone());
        assert_eq!(machine.on_boot().unwrap(), BootOutcome::Steady);
        let outcome = machine.run_cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome::StagedForReboot(v("1.1.0")));
        assert_eq!(machine.bank().boot_slot().unwrap(), SlotId::B);
        assert_eq!(
            machine.bank().read_image(SlotId::B).unwrap(),
            b"firmware image v1.1.0"
        );
    }
    // Descriptor plus artifact.
    assert_eq!(store.fetch_count(), 2);

    // Reboot into the new slot; firmware reaches its healthy checkpoint.
    let mut rebooted = boot_device(device.path(), store.clone());
    assert_eq!(
        rebooted.on_boot().unwrap(),
        BootOutcome::AwaitingConfirmation { pending: v("1.1.0") }
    );

    HealthMarker::clear(device.path()).unwrap();
    HealthMarker::mark(device.path()).unwrap();
    let guard = BootGuard::new(Duration::from_secs(5));
    assert_eq!(
        guard.await_checkpoint(device.path()).await,
        HealthVerdict::Healthy
    );

    let confirmed = rebooted.confirm_boot().unwrap();
    assert_eq!(confirmed, v("1.1.0"));
    assert_eq!(rebooted.state().current_version, v("1.1.0"));
    assert!(rebooted.state().boot_confirmed);

    // The old image is still intact in slot A as the fallback.
    assert_eq!(
        rebooted.bank().read_image(SlotId::A).unwrap(),
        b"firmware image v1.0.0"
    );
    assert_eq!(rebooted.bank().boot_slot().unwrap(), SlotId::B);
}

#[tokio::test]
async fn missed_health_checkpoint_rolls_back() {
    let device = TempDir::new().unwrap();
    seed_factory_image(device.path());
    let store = Arc::new(MemoryBlobStore::new());
    publish_release(&store, "1.1.0", b"firmware that hangs on boot");

    {
        let mut machine = boot_device(device.path(), store.clone());
        let outcome = machine.run_cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome::StagedForReboot(v("1.1.0")));
    }

    // Reboot: the new image never reaches its checkpoint.
    let mut rebooted = boot_device(device.path(), store);
    assert!(matches!(
        rebooted.on_boot().unwrap(),
        BootOutcome::AwaitingConfirmation { .. }
    ));

    HealthMarker::clear(device.path()).unwrap();
    let guard =
        BootGuard::new(Duration::from_millis(80)).with_poll_interval(Duration::from_millis(10));
    assert_eq!(
        guard.await_checkpoint(device.path()).await,
        HealthVerdict::TimedOut
    );

    let outcome = rebooted.roll_back().unwrap();
    assert_eq!(outcome, BootOutcome::RolledBack { abandoned: v("1.1.0") });

    // Active version unchanged; bootloader points back at the old image.
    assert_eq!(rebooted.state().current_version, v("1.0.0"));
    assert_eq!(rebooted.bank().boot_slot().unwrap(), SlotId::A);
    assert_eq!(
        rebooted.bank().read_image(SlotId::A).unwrap(),
        b"firmware image v1.0.0"
    );
}

#[tokio::test]
async fn no_update_when_remote_is_not_newer() {
    let device = TempDir::new().unwrap();
    seed_factory_image(device.path());
    let store = Arc::new(MemoryBlobStore::new());
    publish_release(&store, "1.0.0", b"firmware image v1.0.0");

    let mut machine = boot_device(device.path(), store.clone());
    assert_eq!(machine.run_cycle().await.unwrap(), CycleOutcome::NoUpdate);

    // Only the descriptor was fetched; the artifact blob was never pulled.
    assert_eq!(store.fetch_count(), 1);
    assert!(machine.state().pending_version.is_none());
    assert_eq!(machine.bank().boot_slot().unwrap(), SlotId::A);
}

#[tokio::test]
async fn repeated_crashes_trigger_automatic_rollback() {
    let device = TempDir::new().unwrap();
    seed_factory_image(device.path());
    let store = Arc::new(MemoryBlobStore::new());
    publish_release(&store, "2.0.0", b"firmware that crashes the device");

    {
        let mut machine = boot_device(device.path(), store.clone());
        machine.run_cycle().await.unwrap();
    }

    // Two crash-reboots without confirmation, then the threshold trips.
    for _ in 0..2 {
        let mut crashed = boot_device(device.path(), store.clone());
        assert!(matches!(
            crashed.on_boot().unwrap(),
            BootOutcome::AwaitingConfirmation { .. }
        ));
    }

    let mut final_boot = boot_device(device.path(), store);
    assert_eq!(
        final_boot.on_boot().unwrap(),
        BootOutcome::RolledBack { abandoned: v("2.0.0") }
    );
    assert_eq!(final_boot.bank().boot_slot().unwrap(), SlotId::A);
    assert_eq!(final_boot.state().current_version, v("1.0.0"));
}
