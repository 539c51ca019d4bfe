use std::{path::PathBuf, sync::Arc, time::Duration};

use bulk_mailer::{
    dispatch::DispatchError,
    domain::{ErrorKind, RecipientEmail, RecipientStatus},
    mail_client::MailClientError,
    progress::{CampaignStatus, ChannelReporter, DispatchEvent},
};
use claims::{assert_err, assert_matches, assert_none, assert_ok, assert_some};

use crate::helpers::{
    ScriptedMailClient, dispatch_settings, drain, engine, recipient, recipients, run_campaign,
    template,
};

fn transient() -> MailClientError {
    MailClientError::TransientSend("mail client busy".into())
}

fn unreachable() -> MailClientError {
    MailClientError::Connection("mail client is not running".into())
}

#[tokio::test]
async fn a_recipient_is_sent_after_transient_failures_within_the_budget() {
    // Arrange
    let client =
        ScriptedMailClient::new().with_send_results(vec![Err(transient()), Err(transient())]);
    let recorder = client.recorder();
    let engine = engine(client, dispatch_settings(3));

    // Act
    let (outcome, _) = run_campaign(&engine, recipients(1)).await;

    // Assert
    let record = &outcome.recipients[0];
    assert_eq!(record.status, RecipientStatus::Sent);
    assert_eq!(record.attempts, 3);
    assert_none!(record.last_error.as_ref());
    assert_eq!(recorder.send_calls(), 3);
    assert_eq!(recorder.sent().len(), 1);
}

#[tokio::test]
async fn a_recipient_fails_once_its_attempts_are_exhausted() {
    // Arrange
    let client = ScriptedMailClient::new().always_failing_sends(transient());
    let recorder = client.recorder();
    let engine = engine(client, dispatch_settings(2));

    // Act
    let (outcome, _) = run_campaign(&engine, recipients(1)).await;

    // Assert
    let record = &outcome.recipients[0];
    assert_eq!(record.status, RecipientStatus::Failed);
    assert_eq!(record.attempts, 2);
    assert_eq!(record.last_error.as_ref().unwrap().kind, ErrorKind::TransientSend);
    assert_eq!(recorder.send_calls(), 2);
    assert_eq!(outcome.summary.status, CampaignStatus::Completed);
}

#[tokio::test]
async fn a_missing_attachment_fails_without_retrying() {
    // Arrange
    let client = ScriptedMailClient::new();
    let recorder = client.recorder();
    let engine = engine(client, dispatch_settings(3));
    let mut record = recipient("Smith, John", "john@email.com");
    record.attachment_path = Some(PathBuf::from("/definitely/not/here/notice.pdf"));

    // Act
    let (outcome, _) = run_campaign(&engine, vec![record]).await;

    // Assert
    let record = &outcome.recipients[0];
    assert_eq!(record.status, RecipientStatus::Failed);
    assert_eq!(record.attempts, 1);
    assert_eq!(
        record.last_error.as_ref().unwrap().kind,
        ErrorKind::AttachmentNotFound
    );
    assert_eq!(recorder.send_calls(), 0);
}

#[tokio::test]
async fn an_existing_attachment_is_attached() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notice.pdf");
    std::fs::write(&path, b"%PDF-1.4").unwrap();
    let client = ScriptedMailClient::new();
    let recorder = client.recorder();
    let engine = engine(client, dispatch_settings(3));
    let mut record = recipient("Smith, John", "john@email.com");
    record.attachment_path = Some(path.clone());

    // Act
    let (outcome, _) = run_campaign(&engine, vec![record]).await;

    // Assert
    assert_eq!(outcome.recipients[0].status, RecipientStatus::Sent);
    assert_eq!(recorder.sent()[0].attachment, Some(path));
}

#[tokio::test]
async fn a_rejected_send_is_not_retried() {
    // Arrange
    let client = ScriptedMailClient::new().with_send_results(vec![Err(
        MailClientError::SendRejected("invalid recipient".into()),
    )]);
    let recorder = client.recorder();
    let engine = engine(client, dispatch_settings(3));

    // Act
    let (outcome, _) = run_campaign(&engine, recipients(2)).await;

    // Assert
    assert_eq!(outcome.recipients[0].status, RecipientStatus::Failed);
    assert_eq!(outcome.recipients[0].attempts, 1);
    assert_eq!(outcome.recipients[1].status, RecipientStatus::Sent);
    assert_eq!(recorder.send_calls(), 2);
}

#[tokio::test]
async fn the_body_greets_by_surname_and_the_subject_uses_the_full_name() {
    // Arrange
    let client = ScriptedMailClient::new();
    let recorder = client.recorder();
    let engine = engine(client, dispatch_settings(3));
    let mut record = recipient("Dela Cruz, Juan", "juan@email.com");
    record.cc = vec![RecipientEmail::parse("boss@email.com".to_string()).unwrap()];

    // Act
    let (outcome, _) = run_campaign(&engine, vec![record]).await;

    // Assert
    assert_eq!(outcome.recipients[0].status, RecipientStatus::Sent);
    let sent = &recorder.sent()[0];
    assert_eq!(sent.to, "juan@email.com");
    assert_eq!(sent.cc, vec!["boss@email.com".to_string()]);
    assert_eq!(sent.subject, "NOTICE TO SUBMIT REQUIREMENTS - Dela Cruz, Juan");
    assert!(sent.body.contains("Dear Dela Cruz,"));
    assert!(!sent.body.contains("{{fullname}}"));
}

#[tokio::test]
async fn summary_counts_add_up_to_the_total() {
    // Arrange
    let client = ScriptedMailClient::new().with_send_results(vec![
        Ok(()),
        Err(MailClientError::SendRejected("bounced".into())),
    ]);
    let engine = engine(client, dispatch_settings(1));
    let mut records = recipients(4);
    records[3].status = RecipientStatus::Skipped;

    // Act
    let (outcome, _) = run_campaign(&engine, records).await;

    // Assert
    let summary = &outcome.summary;
    assert_eq!(summary.total, 4);
    assert_eq!(summary.sent, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.pending, 0);
    assert_eq!(
        summary.sent + summary.failed + summary.pending + summary.skipped,
        summary.total
    );
    assert!(summary.finished_at >= summary.started_at);
    assert_none!(summary.error.as_ref());
}

#[tokio::test]
async fn skipped_records_are_never_sent() {
    // Arrange
    let client = ScriptedMailClient::new();
    let recorder = client.recorder();
    let engine = engine(client, dispatch_settings(3));
    let mut records = recipients(2);
    records[0].status = RecipientStatus::Skipped;

    // Act
    let (outcome, _) = run_campaign(&engine, records).await;

    // Assert
    assert_eq!(outcome.recipients[0].status, RecipientStatus::Skipped);
    assert_eq!(outcome.recipients[0].attempts, 0);
    assert_eq!(recorder.sent().len(), 1);
    assert_eq!(recorder.sent()[0].to, "r1@email.com");
}

#[tokio::test]
async fn events_follow_each_attempt_and_end_with_the_summary() {
    // Arrange
    let client = ScriptedMailClient::new().with_send_results(vec![Err(transient())]);
    let engine = engine(client, dispatch_settings(3));

    // Act
    let (_, events) = run_campaign(&engine, recipients(2)).await;

    // Assert
    let shape: Vec<(&str, usize, u32)> = events
        .iter()
        .map(|event| match event {
            DispatchEvent::RecipientStarted { record, .. } => {
                ("started", record.row, record.attempts)
            }
            DispatchEvent::RecipientSucceeded { record, .. } => {
                ("sent", record.row, record.attempts)
            }
            DispatchEvent::RecipientFailed { record, .. } => {
                ("failed", record.row, record.attempts)
            }
            DispatchEvent::CampaignCompleted(_) => ("completed", 0, 0),
        })
        .collect();
    assert_eq!(
        shape,
        vec![
            ("started", 2, 1),
            ("started", 2, 2),
            ("sent", 2, 2),
            ("started", 3, 1),
            ("sent", 3, 1),
            ("completed", 0, 0),
        ]
    );
}

#[tokio::test]
async fn progress_reaches_one_hundred_percent_on_the_last_recipient() {
    // Arrange
    let client = ScriptedMailClient::new();
    let engine = engine(client, dispatch_settings(3));

    // Act
    let (_, events) = run_campaign(&engine, recipients(4)).await;

    // Assert
    let percents: Vec<u8> = events
        .iter()
        .filter_map(|event| match event {
            DispatchEvent::RecipientSucceeded { progress, .. } => Some(progress.percent()),
            _ => None,
        })
        .collect();
    assert_eq!(percents, vec![25, 50, 75, 100]);
}

#[tokio::test]
async fn stopping_keeps_finished_recipients_and_leaves_the_rest_pending() {
    // Arrange
    let client = ScriptedMailClient::new();
    let recorder = client.recorder();
    let mut settings = dispatch_settings(3);
    settings.inter_send_delay_milliseconds = 500;
    let engine = engine(client, settings);
    let (reporter, mut events) = ChannelReporter::new();
    let handle = engine
        .start(recipients(4), template(), Arc::new(reporter))
        .unwrap();
    loop {
        match events.recv().await {
            Some(DispatchEvent::RecipientSucceeded { .. }) => break,
            Some(_) => continue,
            None => panic!("campaign ended before the first recipient was sent"),
        }
    }

    // Act
    assert!(engine.cancel());
    let outcome = handle.wait().await.unwrap();

    // Assert
    assert_eq!(outcome.summary.status, CampaignStatus::Stopped);
    assert_eq!(outcome.recipients[0].status, RecipientStatus::Sent);
    for record in &outcome.recipients[1..] {
        assert_eq!(record.status, RecipientStatus::Pending);
        assert_eq!(record.attempts, 0);
    }
    assert_eq!(outcome.summary.pending, 3);
    assert_eq!(recorder.sent().len(), 1);
    assert_eq!(engine.status(), CampaignStatus::Idle);
}

#[tokio::test]
async fn stopping_lets_the_attempt_in_flight_finish() {
    // Arrange
    let client = ScriptedMailClient::new();
    let recorder = client.recorder();
    let (client, gate) = client.with_send_gate();
    let engine = engine(client, dispatch_settings(3));
    let (reporter, mut events) = ChannelReporter::new();
    let handle = engine
        .start(recipients(3), template(), Arc::new(reporter))
        .unwrap();
    assert_matches!(
        events.recv().await,
        Some(DispatchEvent::RecipientStarted { .. })
    );

    // Act
    handle.cancel();
    gate.add_permits(1);
    let outcome = handle.wait().await.unwrap();

    // Assert
    assert_eq!(outcome.summary.status, CampaignStatus::Stopped);
    assert_eq!(outcome.recipients[0].status, RecipientStatus::Sent);
    assert_eq!(outcome.recipients[1].status, RecipientStatus::Pending);
    assert_eq!(outcome.recipients[2].status, RecipientStatus::Pending);
    assert_eq!(recorder.sent().len(), 1);
}

#[tokio::test]
async fn stopping_while_waiting_to_retry_fails_the_recipient_with_its_last_error() {
    // Arrange
    let client = ScriptedMailClient::new().with_send_results(vec![Err(transient())]);
    let recorder = client.recorder();
    let (client, gate) = client.with_send_gate();
    let mut settings = dispatch_settings(3);
    settings.retry_backoff_milliseconds = 500;
    settings.max_backoff_milliseconds = 500;
    let engine = engine(client, settings);
    let (reporter, mut events) = ChannelReporter::new();
    let handle = engine
        .start(recipients(3), template(), Arc::new(reporter))
        .unwrap();
    assert_matches!(
        events.recv().await,
        Some(DispatchEvent::RecipientStarted { .. })
    );
    gate.add_permits(1);
    // Let the failed attempt land so the worker sits in its backoff.
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Act
    handle.cancel();
    let outcome = handle.wait().await.unwrap();

    // Assert
    assert_eq!(outcome.summary.status, CampaignStatus::Stopped);
    let record = &outcome.recipients[0];
    assert_eq!(record.status, RecipientStatus::Failed);
    assert_eq!(record.attempts, 1);
    assert_eq!(record.last_error.as_ref().unwrap().kind, ErrorKind::TransientSend);
    assert_eq!(outcome.recipients[1].status, RecipientStatus::Pending);
    assert_eq!(outcome.recipients[2].status, RecipientStatus::Pending);
    assert_eq!(recorder.send_calls(), 1);
}

#[tokio::test]
async fn the_handle_of_a_finished_campaign_cannot_stop_the_next_one() {
    // Arrange
    let client = ScriptedMailClient::new();
    let recorder = client.recorder();
    let (client, gate) = client.with_send_gate();
    let engine = engine(client, dispatch_settings(3));
    let (reporter, _events) = ChannelReporter::new();
    let reporter = Arc::new(reporter);
    gate.add_permits(1);
    let first = engine
        .start(recipients(1), template(), reporter.clone())
        .unwrap();
    while !first.is_finished() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let second = engine.start(recipients(3), template(), reporter).unwrap();

    // Act
    first.cancel();
    gate.add_permits(3);
    let outcome = second.wait().await.unwrap();

    // Assert
    assert_eq!(outcome.summary.status, CampaignStatus::Completed);
    assert_eq!(outcome.summary.sent, 3);
    assert_eq!(recorder.sent().len(), 4);
}

#[tokio::test]
async fn a_second_campaign_is_rejected_while_one_is_running() {
    // Arrange
    let client = ScriptedMailClient::new();
    let (client, gate) = client.with_send_gate();
    let engine = engine(client, dispatch_settings(3));
    let (reporter, _events) = ChannelReporter::new();
    let reporter = Arc::new(reporter);
    let first = engine
        .start(recipients(1), template(), reporter.clone())
        .unwrap();
    assert_eq!(engine.status(), CampaignStatus::Running);

    // Act
    let second = engine.start(recipients(1), template(), reporter.clone());

    // Assert
    assert_matches!(second, Err(DispatchError::CampaignAlreadyRunning));
    gate.add_permits(1);
    let outcome = first.wait().await.unwrap();
    assert_eq!(outcome.summary.sent, 1);
    gate.add_permits(1);
    let third = assert_ok!(engine.start(recipients(1), template(), reporter));
    assert_ok!(third.wait().await);
}

#[tokio::test]
async fn a_campaign_without_pending_recipients_is_rejected() {
    // Arrange
    let client = ScriptedMailClient::new();
    let engine = engine(client, dispatch_settings(3));
    let (reporter, _events) = ChannelReporter::new();
    let reporter = Arc::new(reporter);
    let mut skipped = recipients(2);
    for record in &mut skipped {
        record.status = RecipientStatus::Skipped;
    }

    // Act
    let empty = engine.start(vec![], template(), reporter.clone());
    let all_skipped = engine.start(skipped, template(), reporter);

    // Assert
    assert_matches!(empty, Err(DispatchError::NoRecipients));
    assert_err!(all_skipped);
    assert!(!engine.is_running());
}

#[tokio::test]
async fn the_connection_is_retried_before_the_first_send() {
    // Arrange
    let client = ScriptedMailClient::new().with_connect_results(vec![
        Err(MailClientError::Connection("starting up".into())),
        Err(MailClientError::Connection("starting up".into())),
    ]);
    let recorder = client.recorder();
    let engine = engine(client, dispatch_settings(3));

    // Act
    let (outcome, _) = run_campaign(&engine, recipients(2)).await;

    // Assert
    assert_eq!(outcome.summary.status, CampaignStatus::Completed);
    assert_eq!(outcome.summary.sent, 2);
    assert_eq!(recorder.connects(), 3);
}

#[tokio::test]
async fn an_unreachable_mail_client_fails_the_campaign_and_keeps_recipients_pending() {
    // Arrange
    let client = ScriptedMailClient::new().always_failing_connects();
    let recorder = client.recorder();
    let engine = engine(client, dispatch_settings(3));

    // Act
    let (outcome, events) = run_campaign(&engine, recipients(3)).await;

    // Assert
    assert_eq!(outcome.summary.status, CampaignStatus::Failed);
    assert_eq!(outcome.summary.pending, 3);
    assert_eq!(recorder.connects(), 3);
    assert_eq!(recorder.send_calls(), 0);
    assert_eq!(events.len(), 1);
    let DispatchEvent::CampaignCompleted(summary) = &events[0] else {
        panic!("expected the campaign summary, got {:?}", events[0]);
    };
    let error = assert_some!(summary.error.as_ref());
    assert_eq!(error.reason.kind, ErrorKind::Connection);
    assert!(error.reason.detail.contains("mail client is not running"));
    assert_eq!(error.connect_attempts, 3);
    assert_eq!(outcome.summary.error.as_ref(), Some(error));
}

#[tokio::test]
async fn losing_the_connection_mid_recipient_fails_it_and_the_campaign() {
    // Arrange
    let client = ScriptedMailClient::new()
        .with_send_results(vec![Err(MailClientError::Connection("mail client closed".into()))])
        .with_connect_results(vec![
            Ok(()),
            Err(unreachable()),
            Err(unreachable()),
            Err(unreachable()),
        ]);
    let recorder = client.recorder();
    let engine = engine(client, dispatch_settings(3));

    // Act
    let (outcome, events) = run_campaign(&engine, recipients(3)).await;

    // Assert
    assert_eq!(outcome.summary.status, CampaignStatus::Failed);
    let record = &outcome.recipients[0];
    assert_eq!(record.status, RecipientStatus::Failed);
    assert_eq!(record.attempts, 1);
    assert_eq!(record.last_error.as_ref().unwrap().kind, ErrorKind::Connection);
    assert_eq!(outcome.recipients[1].status, RecipientStatus::Pending);
    assert_eq!(outcome.recipients[2].status, RecipientStatus::Pending);
    assert_eq!(recorder.connects(), 4);
    assert_matches!(
        &events[1],
        DispatchEvent::RecipientFailed {
            error: ErrorKind::Connection,
            ..
        }
    );
    let error = assert_some!(outcome.summary.error.as_ref());
    assert_eq!(error.connect_attempts, 3);
}

#[tokio::test]
async fn a_dropped_connection_is_reestablished_and_the_send_retried() {
    // Arrange
    let client = ScriptedMailClient::new().with_send_results(vec![Err(
        MailClientError::Connection("mail client closed".into()),
    )]);
    let recorder = client.recorder();
    let engine = engine(client, dispatch_settings(3));

    // Act
    let (outcome, _) = run_campaign(&engine, recipients(2)).await;

    // Assert
    assert_eq!(outcome.recipients[0].status, RecipientStatus::Sent);
    assert_eq!(outcome.recipients[0].attempts, 2);
    assert_eq!(outcome.recipients[1].status, RecipientStatus::Sent);
    assert_eq!(recorder.connects(), 2);
}

#[tokio::test]
async fn a_send_that_never_answers_times_out_as_transient() {
    // Arrange
    let client = ScriptedMailClient::new();
    let (client, _gate) = client.with_send_gate();
    let mut settings = dispatch_settings(1);
    settings.send_timeout_milliseconds = 50;
    let engine = engine(client, settings);

    // Act
    let (outcome, _) = run_campaign(&engine, recipients(1)).await;

    // Assert
    let record = &outcome.recipients[0];
    assert_eq!(record.status, RecipientStatus::Failed);
    assert_eq!(record.last_error.as_ref().unwrap().kind, ErrorKind::TransientSend);
}

#[tokio::test]
async fn cancel_without_a_running_campaign_is_a_no_op() {
    // Arrange
    let client = ScriptedMailClient::new();
    let engine = engine(client, dispatch_settings(3));

    // Act
    let cancelled = engine.cancel();
    let (outcome, _) = run_campaign(&engine, recipients(2)).await;

    // Assert
    assert!(!cancelled);
    assert_eq!(outcome.summary.status, CampaignStatus::Completed);
}

#[tokio::test]
async fn events_can_be_drained_after_the_worker_is_gone() {
    // Arrange
    let client = ScriptedMailClient::new();
    let engine = engine(client, dispatch_settings(3));
    let (reporter, events) = ChannelReporter::new();
    let handle = engine
        .start(recipients(1), template(), Arc::new(reporter))
        .unwrap();

    // Act
    tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .unwrap()
        .unwrap();
    let events = drain(events).await;

    // Assert
    assert_matches!(events.last(), Some(DispatchEvent::CampaignCompleted(_)));
}
