mod util;

use ca_hierarchy::cert::extensions::{ExtendedKeyUsageOption, KeyUsages};
use ca_hierarchy::cert::{Certificate, verify_chain};
use ca_hierarchy::error::PkiError;
use ca_hierarchy::hierarchy::HierarchyState;
use ca_hierarchy::issuance::{CertificateRequest, IssuanceEngine, IssueOutcome};
use ca_hierarchy::key::KeyPair;
use ca_hierarchy::ledger::{EntryStatus, Ledger, Serial};
use ca_hierarchy::operator::{Confirmation, PassphraseStage, ScriptedOperator};
use ca_hierarchy::pem_utils::split_certificates;
use ca_hierarchy::policy::{CaRole, PrincipalClass, ServerCa};
use ca_hierarchy::vault::PassphraseVault;

fn request(class: PrincipalClass, name: &str) -> CertificateRequest {
    CertificateRequest::builder()
        .class(class)
        .common_name(name.to_string())
        .build()
}

fn issued(outcome: IssueOutcome) -> Box<ca_hierarchy::issuance::IssuedCertificateBundle> {
    match outcome {
        IssueOutcome::Issued(bundle) => bundle,
        IssueOutcome::Declined { artifact } => panic!("issuance of {artifact} was declined"),
    }
}

#[test]
fn server_certificate_from_domain_ca() {
    let dir = tempfile::tempdir().unwrap();
    let manager = util::manager(dir.path());
    let (hierarchy, mut vault) = util::setup(&manager);
    let engine = IssuanceEngine::new(&manager, &hierarchy);

    let request = CertificateRequest::builder()
        .class(PrincipalClass::Server)
        .common_name("mail.example.com".to_string())
        .alt_names(vec!["smtp.example.com".to_string()])
        .build();
    let bundle = issued(engine.issue(&request, &mut util::operator(), &mut vault).unwrap());

    assert_eq!(bundle.ca, CaRole::DomainServer);
    assert_eq!(bundle.serial, Serial::new(1000));
    assert_eq!(bundle.artifact, "mail.example.com");

    let cert = &bundle.certificate;
    assert_eq!(cert.serial().unwrap(), Serial::new(1000));
    assert!(!cert.is_ca().unwrap());
    assert_eq!(
        cert.subject_alt_names().unwrap(),
        vec!["mail.example.com", "smtp.example.com"]
    );
    assert_eq!(
        cert.extended_key_usage().unwrap(),
        vec![ExtendedKeyUsageOption::ServerAuth]
    );

    let subject = cert.subject();
    assert_eq!(subject.common_name, "mail.example.com");
    assert_eq!(subject.organization.as_deref(), Some("ACME"));
    assert_eq!(subject.country.as_deref(), Some("DE"));
    assert_eq!(subject.organization_unit.as_deref(), Some("Servers"));
    assert_eq!(subject.email.as_deref(), Some("hostmaster@example.com"));

    assert_eq!(bundle.chain.len(), 3);
    verify_chain(&bundle.chain).unwrap();

    let ledger = hierarchy.authority(CaRole::DomainServer).unwrap().ledger();
    let entry = ledger.lookup(Serial::new(1000)).unwrap();
    assert_eq!(entry.status, EntryStatus::Valid);
    assert_eq!(entry.subject, subject.to_oneline());
    assert_eq!(ledger.next_serial(), Serial::new(1001));
}

#[test]
fn bundle_files_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let manager = util::manager(dir.path());
    let (hierarchy, mut vault) = util::setup(&manager);
    let engine = IssuanceEngine::new(&manager, &hierarchy);

    let bundle = issued(
        engine
            .issue(
                &request(PrincipalClass::Server, "www.example.com"),
                &mut util::operator(),
                &mut vault,
            )
            .unwrap(),
    );
    let files = &bundle.files;
    for path in files.all() {
        assert!(path.is_file(), "{} missing", path.display());
    }

    let key = KeyPair::from_pkcs8_pem(&std::fs::read_to_string(&files.key).unwrap()).unwrap();
    let cert = Certificate::from_pem(&std::fs::read_to_string(&files.cert).unwrap()).unwrap();
    assert_eq!(cert.public_key().unwrap(), key.public_key());

    let chain = split_certificates(&std::fs::read_to_string(&files.fullchain).unwrap()).unwrap();
    assert_eq!(chain.len(), 3);
    assert_eq!(chain[0].to_der().unwrap(), bundle.certificate.to_der().unwrap());
    verify_chain(&chain).unwrap();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&files.key).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o400);
    }
}

#[test]
fn user_certificate_from_people_ca() {
    let dir = tempfile::tempdir().unwrap();
    let manager = util::manager(dir.path());
    let (hierarchy, mut vault) = util::setup(&manager);
    let engine = IssuanceEngine::new(&manager, &hierarchy);

    let request = CertificateRequest::builder()
        .class(PrincipalClass::User)
        .common_name("Fritz Meier".to_string())
        .organizational_unit("Engineering".to_string())
        .email("fritz@example.com".to_string())
        .alt_names(vec!["fritz.example.com".to_string()])
        .build();
    let bundle = issued(engine.issue(&request, &mut util::operator(), &mut vault).unwrap());

    assert_eq!(bundle.ca, CaRole::People);
    assert_eq!(bundle.serial, Serial::new(2000));
    assert_eq!(bundle.artifact, "fritz_meier");
    assert!(bundle.files.cert.ends_with("certs/fritz_meier.cert.pem"));

    let cert = &bundle.certificate;
    let usage = cert.key_usage().unwrap().unwrap();
    assert!(usage.contains(KeyUsages::NonRepudiation));
    assert!(usage.contains(KeyUsages::DigitalSignature));
    assert!(!usage.contains(KeyUsages::KeyCertSign));
    assert_eq!(
        cert.extended_key_usage().unwrap(),
        vec![
            ExtendedKeyUsageOption::ClientAuth,
            ExtendedKeyUsageOption::EmailProtection
        ]
    );
    assert!(cert.subject_alt_names().unwrap().is_empty());

    let subject = cert.subject();
    assert_eq!(subject.organization_unit.as_deref(), Some("Engineering"));
    assert_eq!(subject.email.as_deref(), Some("fritz@example.com"));
    verify_chain(&bundle.chain).unwrap();
}

#[test]
fn every_class_chains_to_the_root() {
    let dir = tempfile::tempdir().unwrap();
    let manager = util::manager(dir.path());
    let (hierarchy, mut vault) = util::setup(&manager);
    let engine = IssuanceEngine::new(&manager, &hierarchy);
    let root = hierarchy.root().unwrap().certificate().to_der().unwrap();

    let cases = [
        (PrincipalClass::Server, ServerCa::Domain, "a.example.com", CaRole::DomainServer, 1000),
        (PrincipalClass::Server, ServerCa::Generic, "ldap.internal", CaRole::GenericServer, 4000),
        (PrincipalClass::User, ServerCa::Domain, "Erika Muster", CaRole::People, 2000),
        (PrincipalClass::Device, ServerCa::Domain, "sensor-17", CaRole::Device, 3000),
    ];
    for (class, server_ca, name, ca, serial) in cases {
        let request = CertificateRequest::builder()
            .class(class)
            .server_ca(server_ca)
            .common_name(name.to_string())
            .build();
        let bundle = issued(engine.issue(&request, &mut util::operator(), &mut vault).unwrap());
        assert_eq!(bundle.ca, ca);
        assert_eq!(bundle.serial, Serial::new(serial));
        assert_eq!(bundle.chain.last().unwrap().to_der().unwrap(), root);
        verify_chain(&bundle.chain).unwrap();
    }

    let device = hierarchy.authority(CaRole::Device).unwrap();
    let cert = Certificate::from_pem(
        &std::fs::read_to_string(device.paths().artifact("sensor-17").cert).unwrap(),
    )
    .unwrap();
    assert_eq!(
        cert.extended_key_usage().unwrap(),
        vec![
            ExtendedKeyUsageOption::ServerAuth,
            ExtendedKeyUsageOption::ClientAuth
        ]
    );
}

#[test]
fn issuing_before_setup_fails_without_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let manager = util::manager(dir.path());
    assert!(matches!(
        manager.load(),
        Err(PkiError::HierarchyNotInitialized)
    ));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn empty_subject_is_rejected_before_anything_else() {
    let dir = tempfile::tempdir().unwrap();
    let manager = util::manager(dir.path());
    let (hierarchy, _) = util::setup(&manager);
    let engine = IssuanceEngine::new(&manager, &hierarchy);
    let mut vault = PassphraseVault::new();
    let mut operator = util::operator();

    let err = engine
        .issue(&request(PrincipalClass::Device, "   "), &mut operator, &mut vault)
        .unwrap_err();
    assert!(matches!(err, PkiError::EmptySubject));
    assert!(err.is_validation());
    assert!(operator.prompts().is_empty());
    let ledger = hierarchy.authority(CaRole::Device).unwrap().ledger();
    assert_eq!(ledger.next_serial(), Serial::new(3000));
}

#[test]
fn unknown_class_name_is_rejected() {
    let err = "printer".parse::<PrincipalClass>().unwrap_err();
    assert!(matches!(err, PkiError::UnknownProfile(name) if name == "printer"));
}

#[test]
fn declined_overwrite_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let manager = util::manager(dir.path());
    let (hierarchy, mut vault) = util::setup(&manager);
    let engine = IssuanceEngine::new(&manager, &hierarchy);
    let req = request(PrincipalClass::Server, "mail.example.com");

    let first = issued(engine.issue(&req, &mut util::operator(), &mut vault).unwrap());
    let before = std::fs::read_to_string(&first.files.cert).unwrap();

    for _ in 0..2 {
        let mut operator = util::operator().always(false);
        let outcome = engine.issue(&req, &mut operator, &mut vault).unwrap();
        assert!(matches!(
            outcome,
            IssueOutcome::Declined { ref artifact } if artifact == "mail.example.com"
        ));
        assert_eq!(
            operator.confirmations(),
            &[Confirmation::OverwriteBundle {
                artifact: "mail.example.com".to_string()
            }]
        );
    }

    assert_eq!(std::fs::read_to_string(&first.files.cert).unwrap(), before);
    let ledger = hierarchy.authority(CaRole::DomainServer).unwrap().ledger();
    assert_eq!(ledger.entries().len(), 1);
    assert_eq!(ledger.next_serial(), Serial::new(1001));
}

#[test]
fn accepted_overwrite_retains_the_old_entry_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let manager = util::manager(dir.path());
    let (hierarchy, mut vault) = util::setup(&manager);
    let engine = IssuanceEngine::new(&manager, &hierarchy);
    let req = request(PrincipalClass::User, "Fritz Meier");

    issued(engine.issue(&req, &mut util::operator(), &mut vault).unwrap());
    let second = issued(
        engine
            .issue(&req, &mut util::operator().always(true), &mut vault)
            .unwrap(),
    );
    assert_eq!(second.serial, Serial::new(2001));

    let ledger = hierarchy.authority(CaRole::People).unwrap().ledger();
    assert_eq!(ledger.lookup(Serial::new(2000)).unwrap().status, EntryStatus::Valid);
    let latest = ledger
        .lookup_by_subject(&second.certificate.subject().to_oneline())
        .unwrap();
    assert_eq!(latest.serial, Serial::new(2001));
}

#[test]
fn accepted_overwrite_revokes_the_old_entry_when_configured() {
    let dir = tempfile::tempdir().unwrap();
    let manager = util::revoking_manager(dir.path());
    let (hierarchy, mut vault) = util::setup(&manager);
    let engine = IssuanceEngine::new(&manager, &hierarchy);
    let req = request(PrincipalClass::Device, "sensor-17");

    issued(engine.issue(&req, &mut util::operator(), &mut vault).unwrap());
    issued(
        engine
            .issue(&req, &mut util::operator().always(true), &mut vault)
            .unwrap(),
    );

    let ledger = hierarchy.authority(CaRole::Device).unwrap().ledger();
    let old = ledger.lookup(Serial::new(3000)).unwrap();
    assert!(old.is_revoked());
    assert!(old.revoked_at.is_some());
    assert_eq!(ledger.lookup(Serial::new(3001)).unwrap().status, EntryStatus::Valid);
}

#[test]
fn passphrase_is_prompted_once_and_then_cached() {
    let dir = tempfile::tempdir().unwrap();
    let manager = util::manager(dir.path());
    let (hierarchy, mut vault) = util::setup(&manager);
    vault.clear_all();
    assert!(vault.is_empty());

    let engine = IssuanceEngine::new(&manager, &hierarchy);
    let mut operator = util::operator();
    for name in ["one.example.com", "two.example.com"] {
        issued(
            engine
                .issue(&request(PrincipalClass::Server, name), &mut operator, &mut vault)
                .unwrap(),
        );
    }
    assert_eq!(
        operator.prompts(),
        &[(CaRole::DomainServer, PassphraseStage::Unlock)]
    );
    assert_eq!(vault.len(), 1);
}

#[test]
fn wrong_passphrase_is_not_cached_and_consumes_no_serial() {
    let dir = tempfile::tempdir().unwrap();
    let manager = util::manager(dir.path());
    let (hierarchy, _) = util::setup(&manager);
    let engine = IssuanceEngine::new(&manager, &hierarchy);
    let mut vault = PassphraseVault::new();
    let mut operator = ScriptedOperator::new().with_passphrase(CaRole::People, "not it");

    let err = engine
        .issue(&request(PrincipalClass::User, "Fritz Meier"), &mut operator, &mut vault)
        .unwrap_err();
    assert!(matches!(err, PkiError::CryptoProvider(_)));
    assert!(vault.is_empty());

    let people = hierarchy.authority(CaRole::People).unwrap();
    assert_eq!(people.ledger().next_serial(), Serial::new(2000));
    assert!(!people.paths().artifact("fritz_meier").any_exists());
}

#[test]
fn revoke_marks_ledger_entries() {
    let dir = tempfile::tempdir().unwrap();
    let manager = util::manager(dir.path());
    let (hierarchy, mut vault) = util::setup(&manager);
    let engine = IssuanceEngine::new(&manager, &hierarchy);

    let bundle = issued(
        engine
            .issue(
                &request(PrincipalClass::Server, "old.example.com"),
                &mut util::operator(),
                &mut vault,
            )
            .unwrap(),
    );
    engine.revoke(CaRole::DomainServer, bundle.serial).unwrap();
    engine.revoke(CaRole::DomainServer, bundle.serial).unwrap();

    let reloaded = manager.load().unwrap();
    let ledger = reloaded.authority(CaRole::DomainServer).unwrap().ledger();
    assert!(ledger.lookup(bundle.serial).unwrap().is_revoked());

    assert!(matches!(
        engine.revoke(CaRole::DomainServer, Serial::new(1999)),
        Err(PkiError::UnknownSerial { ca: CaRole::DomainServer, .. })
    ));
}

#[test]
fn subjects_naming_the_ca_files_are_refused() {
    let dir = tempfile::tempdir().unwrap();
    let manager = util::manager(dir.path());
    let (hierarchy, mut vault) = util::setup(&manager);
    let engine = IssuanceEngine::new(&manager, &hierarchy);

    for (class, name, role) in [
        (PrincipalClass::Server, "CA", CaRole::DomainServer),
        (PrincipalClass::User, "ca-chain", CaRole::People),
    ] {
        let ca = hierarchy.authority(role).unwrap();
        let cert_before = std::fs::read_to_string(ca.paths().cert_file()).unwrap();
        let chain_before = std::fs::read_to_string(ca.paths().chain_file()).unwrap();

        let mut operator = util::operator().always(true);
        let err = engine
            .issue(&request(class, name), &mut operator, &mut vault)
            .unwrap_err();
        assert!(matches!(err, PkiError::ReservedSubject(ref s) if s == name));
        assert!(err.is_validation());
        assert!(operator.prompts().is_empty());
        assert!(operator.confirmations().is_empty());

        assert_eq!(std::fs::read_to_string(ca.paths().cert_file()).unwrap(), cert_before);
        assert_eq!(std::fs::read_to_string(ca.paths().chain_file()).unwrap(), chain_before);
        assert!(ca.ledger().entries().is_empty());
        assert_eq!(ca.ledger().next_serial(), ca.ledger().start_serial());
    }

    assert_eq!(manager.state(), HierarchyState::Complete);
    let reloaded = manager.load().unwrap();
    let domain = reloaded.authority(CaRole::DomainServer).unwrap();
    assert!(domain.certificate().is_ca().unwrap());
}

#[test]
fn overwrite_only_revokes_the_entry_the_file_belongs_to() {
    let dir = tempfile::tempdir().unwrap();
    let manager = util::revoking_manager(dir.path());
    let (hierarchy, mut vault) = util::setup(&manager);
    let engine = IssuanceEngine::new(&manager, &hierarchy);
    let device = hierarchy.authority(CaRole::Device).unwrap();

    let sensor = issued(
        engine
            .issue(&request(PrincipalClass::Device, "sensor-17"), &mut util::operator(), &mut vault)
            .unwrap(),
    );
    assert_eq!(sensor.serial, Serial::new(3000));

    // A certificate signed by this CA, but filed under another name.
    let copied = device.paths().artifact("copied");
    std::fs::copy(&sensor.files.cert, &copied.cert).unwrap();
    // A certificate this CA never signed.
    let foreign = device.paths().artifact("foreign");
    let root = hierarchy.root().unwrap();
    std::fs::copy(root.paths().cert_file(), &foreign.cert).unwrap();

    for name in ["copied", "foreign"] {
        let mut operator = util::operator().always(true);
        let bundle = issued(
            engine
                .issue(&request(PrincipalClass::Device, name), &mut operator, &mut vault)
                .unwrap(),
        );
        assert_eq!(operator.confirmations().len(), 1);
        assert_eq!(bundle.certificate.subject().common_name, name);
    }

    let ledger = device.ledger();
    assert_eq!(ledger.lookup(Serial::new(3000)).unwrap().status, EntryStatus::Valid);
    assert!(ledger.entries().iter().all(|entry| !entry.is_revoked()));
    assert_eq!(ledger.next_serial(), Serial::new(3003));
    assert!(sensor.files.cert.is_file());

    // Replacing the genuine bundle still revokes its entry.
    issued(
        engine
            .issue(
                &request(PrincipalClass::Device, "sensor-17"),
                &mut util::operator().always(true),
                &mut vault,
            )
            .unwrap(),
    );
    assert!(ledger.lookup(Serial::new(3000)).unwrap().is_revoked());
}

#[test]
fn signing_failure_voids_the_serial_and_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (_, mut vault) = util::setup(&util::manager(dir.path()));
    let manager = util::failing_manager(dir.path(), util::FailingProvider::failing_sign(1));
    let hierarchy = manager.load().unwrap();
    let engine = IssuanceEngine::new(&manager, &hierarchy);

    let err = engine
        .issue(
            &request(PrincipalClass::Server, "www.example.com"),
            &mut util::operator(),
            &mut vault,
        )
        .unwrap_err();
    assert!(matches!(err, PkiError::CryptoProvider(_)));
    assert_eq!(manager.provider().signs(), 1);

    let domain = hierarchy.authority(CaRole::DomainServer).unwrap();
    let ledger = domain.ledger();
    assert_eq!(ledger.voided(), vec![Serial::new(1000)]);
    assert_eq!(ledger.next_serial(), Serial::new(1001));
    assert!(ledger.entries().is_empty());
    assert!(!domain.paths().artifact("www.example.com").any_exists());

    let reopened = Ledger::open(domain.paths().dir(), CaRole::DomainServer).unwrap();
    assert_eq!(reopened.voided(), vec![Serial::new(1000)]);
    assert_eq!(reopened.next_serial(), Serial::new(1001));
    assert!(reopened.entries().is_empty());
}

#[test]
fn key_export_failure_after_signing_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let (_, mut vault) = util::setup(&util::manager(dir.path()));
    let manager = util::failing_manager(dir.path(), util::FailingProvider::failing_export_key());
    let hierarchy = manager.load().unwrap();
    let engine = IssuanceEngine::new(&manager, &hierarchy);

    let err = engine
        .issue(
            &request(PrincipalClass::User, "Fritz Meier"),
            &mut util::operator(),
            &mut vault,
        )
        .unwrap_err();
    assert!(matches!(err, PkiError::CryptoProvider(_)));
    assert_eq!(manager.provider().signs(), 1);

    let people = hierarchy.authority(CaRole::People).unwrap();
    assert_eq!(people.ledger().voided(), vec![Serial::new(2000)]);
    assert_eq!(people.ledger().next_serial(), Serial::new(2001));
    assert!(people.ledger().entries().is_empty());
    assert!(!people.paths().artifact("fritz_meier").any_exists());

    // The next issuance continues after the voided serial.
    let manager = util::manager(dir.path());
    let hierarchy = manager.load().unwrap();
    let bundle = issued(
        IssuanceEngine::new(&manager, &hierarchy)
            .issue(
                &request(PrincipalClass::User, "Fritz Meier"),
                &mut util::operator(),
                &mut vault,
            )
            .unwrap(),
    );
    assert_eq!(bundle.serial, Serial::new(2001));
}
