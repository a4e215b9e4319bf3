//! Campaign launch fan-out from the tenant actor to conversation actors.

use outpost::conversation::types::MessageStatus;
use outpost::error::{DomainError, Resource};
use outpost::launch::first_message_key;
use outpost::tenant::types::{
    Campaign, CampaignKind, CampaignStatus, Customer, NewCampaign, NewCustomer, NewSegment,
    SegmentKind,
};
use uuid::Uuid;

#[path = "test_utils/mod.rs"]
mod test_utils;

use test_utils::{TestPlatform, slug};

const PHONES: [&str; 3] = ["+15550100001", "+15550100002", "+15550100003"];

struct Fixture {
    tp: TestPlatform,
    customers: Vec<Customer>,
    campaign: Campaign,
}

async fn customer(tp: &TestPlatform, phone: &str) -> Customer {
    tp.platform
        .tenant(&slug("acme"))
        .await
        .unwrap()
        .create_customer(NewCustomer {
            phone: Some(phone.to_string()),
            sms_opt_in: true,
            ..NewCustomer::default()
        })
        .await
        .unwrap()
}

async fn manual_segment(tp: &TestPlatform, name: &str, members: &[&Customer]) -> Uuid {
    let tenant = tp.platform.tenant(&slug("acme")).await.unwrap();
    let segment = tenant
        .create_segment(NewSegment {
            name: name.to_string(),
            kind: SegmentKind::Manual,
            query: None,
        })
        .await
        .unwrap();
    tenant
        .add_customers_to_segment(segment.id, members.iter().map(|c| c.id).collect())
        .await
        .unwrap();
    segment.id
}

/// Segments A {c1, c2} and B {c2, c3} behind one campaign.
async fn overlapping_campaign() -> Fixture {
    let tp = TestPlatform::new().await.unwrap();
    tp.tenant_with_owner("acme").await.unwrap();

    let mut customers = Vec::new();
    for phone in PHONES {
        customers.push(customer(&tp, phone).await);
    }
    let a = manual_segment(&tp, "A", &[&customers[0], &customers[1]]).await;
    let b = manual_segment(&tp, "B", &[&customers[1], &customers[2]]).await;

    let campaign = tp
        .platform
        .tenant(&slug("acme"))
        .await
        .unwrap()
        .create_campaign(NewCampaign {
            name: "Spring".to_string(),
            kind: CampaignKind::Broadcast,
            timezone: "Europe/Berlin".to_string(),
            message_template: "Spring sale starts today".to_string(),
            segment_ids: vec![a, b],
        })
        .await
        .unwrap();

    Fixture {
        tp,
        customers,
        campaign,
    }
}

#[tokio::test]
async fn overlapping_segments_contact_each_customer_once() {
    let fx = overlapping_campaign().await;

    let summary = fx
        .tp
        .platform
        .launcher
        .launch(&slug("acme"), fx.campaign.id, false)
        .await
        .unwrap();

    assert_eq!(summary.total_customers, 3);
    assert_eq!(summary.conversations_created, 3);
    assert_eq!(summary.messages_sent, 3);
    assert_eq!(summary.already_contacted, 0);
    assert!(summary.errors.is_empty());

    for phone in PHONES {
        assert_eq!(fx.tp.provider.sent_to(phone), 1, "phone {phone}");

        let view = fx
            .tp
            .platform
            .conversation(&slug("acme"), phone)
            .await
            .unwrap()
            .get_conversation()
            .await
            .unwrap();
        assert_eq!(view.conversation.origin_campaign_id, Some(fx.campaign.id));
        assert_eq!(view.messages.len(), 1);
        assert_eq!(
            view.messages[0].idempotency_key.as_deref(),
            Some(first_message_key(fx.campaign.id, phone).as_str())
        );
    }

    let campaign = fx
        .tp
        .platform
        .tenant(&slug("acme"))
        .await
        .unwrap()
        .get_campaign(fx.campaign.id)
        .await
        .unwrap();
    assert_eq!(campaign.status, CampaignStatus::Active);
    assert_eq!(campaign.targeted_count, 3);
    assert_eq!(campaign.contacted_count, 3);
    assert_eq!(campaign.failed_count, 0);
    assert!(campaign.launched_at.is_some());
}

#[tokio::test]
async fn relaunch_sends_nothing_new() {
    let fx = overlapping_campaign().await;
    let launcher = &fx.tp.platform.launcher;

    launcher
        .launch(&slug("acme"), fx.campaign.id, false)
        .await
        .unwrap();
    let again = launcher
        .launch(&slug("acme"), fx.campaign.id, false)
        .await
        .unwrap();

    assert_eq!(again.total_customers, 3);
    assert_eq!(again.conversations_created, 0);
    assert_eq!(again.messages_sent, 0);
    assert_eq!(again.already_contacted, 3);
    assert_eq!(fx.tp.provider.sent().len(), 3);
}

#[tokio::test]
async fn dry_run_touches_nothing() {
    let fx = overlapping_campaign().await;

    let summary = fx
        .tp
        .platform
        .launcher
        .launch(&slug("acme"), fx.campaign.id, true)
        .await
        .unwrap();

    assert!(summary.dry_run);
    assert_eq!(summary.total_customers, 3);
    assert_eq!(summary.conversations_created, 0);
    assert_eq!(summary.messages_sent, 0);
    assert!(fx.tp.provider.sent().is_empty());
    assert_eq!(fx.tp.platform.conversations.active_count(), 0);

    let campaign = fx
        .tp
        .platform
        .tenant(&slug("acme"))
        .await
        .unwrap()
        .get_campaign(fx.campaign.id)
        .await
        .unwrap();
    assert_eq!(campaign.status, CampaignStatus::Draft);
    assert!(campaign.launched_at.is_none());
}

#[tokio::test]
async fn one_failed_customer_does_not_stop_the_rest() {
    let fx = overlapping_campaign().await;
    fx.tp.provider.reject(PHONES[1]);

    let summary = fx
        .tp
        .platform
        .launcher
        .launch(&slug("acme"), fx.campaign.id, false)
        .await
        .unwrap();

    assert_eq!(summary.total_customers, 3);
    assert_eq!(summary.messages_sent, 2);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].contains(&fx.customers[1].id.to_string()));

    let campaign = fx
        .tp
        .platform
        .tenant(&slug("acme"))
        .await
        .unwrap()
        .get_campaign(fx.campaign.id)
        .await
        .unwrap();
    assert_eq!(campaign.contacted_count, 2);
    assert_eq!(campaign.failed_count, 1);
}

#[tokio::test]
async fn relaunch_retries_customers_whose_first_message_failed() {
    let fx = overlapping_campaign().await;
    let launcher = &fx.tp.platform.launcher;
    fx.tp.provider.reject(PHONES[1]);

    let first = launcher
        .launch(&slug("acme"), fx.campaign.id, false)
        .await
        .unwrap();
    assert_eq!(first.errors.len(), 1);

    fx.tp.provider.accept(PHONES[1]);
    let again = launcher
        .launch(&slug("acme"), fx.campaign.id, false)
        .await
        .unwrap();

    assert_eq!(again.messages_sent, 1);
    assert_eq!(again.already_contacted, 2);
    assert!(again.errors.is_empty());
    assert_eq!(fx.tp.provider.sent_to(PHONES[0]), 1);
    assert_eq!(fx.tp.provider.sent_to(PHONES[1]), 2);

    let view = fx
        .tp
        .platform
        .conversation(&slug("acme"), PHONES[1])
        .await
        .unwrap()
        .get_conversation()
        .await
        .unwrap();
    let statuses: Vec<_> = view.messages.iter().map(|m| m.status).collect();
    assert_eq!(statuses, vec![MessageStatus::Failed, MessageStatus::Sent]);

    let campaign = fx
        .tp
        .platform
        .tenant(&slug("acme"))
        .await
        .unwrap()
        .get_campaign(fx.campaign.id)
        .await
        .unwrap();
    assert_eq!(campaign.contacted_count, 3);
    assert_eq!(campaign.failed_count, 0);

    // Once delivered, further relaunches leave the customer alone
    let third = launcher
        .launch(&slug("acme"), fx.campaign.id, false)
        .await
        .unwrap();
    assert_eq!(third.messages_sent, 0);
    assert_eq!(fx.tp.provider.sent_to(PHONES[1]), 2);
}

#[tokio::test]
async fn unreachable_customers_are_reported_not_messaged() {
    let tp = TestPlatform::new().await.unwrap();
    tp.tenant_with_owner("acme").await.unwrap();
    let tenant = tp.platform.tenant(&slug("acme")).await.unwrap();

    let reachable = customer(&tp, PHONES[0]).await;
    let opted_out = tenant
        .create_customer(NewCustomer {
            phone: Some(PHONES[1].to_string()),
            sms_opt_in: false,
            ..NewCustomer::default()
        })
        .await
        .unwrap();
    let email_only = tenant
        .create_customer(NewCustomer {
            email: Some("ada@example.com".to_string()),
            ..NewCustomer::default()
        })
        .await
        .unwrap();
    let segment = manual_segment(&tp, "Everyone", &[&reachable, &opted_out, &email_only]).await;

    let campaign = tenant
        .create_campaign(NewCampaign {
            name: "Mixed".to_string(),
            kind: CampaignKind::Broadcast,
            timezone: "UTC".to_string(),
            message_template: "Hello".to_string(),
            segment_ids: vec![segment],
        })
        .await
        .unwrap();

    let summary = tp
        .platform
        .launcher
        .launch(&slug("acme"), campaign.id, false)
        .await
        .unwrap();

    assert_eq!(summary.total_customers, 3);
    assert_eq!(summary.messages_sent, 1);
    assert_eq!(summary.errors.len(), 2);
    assert_eq!(tp.provider.sent().len(), 1);
    assert_eq!(tp.provider.sent_to(PHONES[1]), 0);
}

#[tokio::test]
async fn unknown_campaign_is_not_found() {
    let tp = TestPlatform::new().await.unwrap();
    tp.tenant_with_owner("acme").await.unwrap();

    let err = tp
        .platform
        .launcher
        .launch(&slug("acme"), Uuid::new_v4(), false)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DomainError::NotFound {
            resource: Resource::Campaign,
            ..
        }
    ));
}

#[tokio::test]
async fn campaign_without_segments_launches_empty() {
    let tp = TestPlatform::new().await.unwrap();
    tp.tenant_with_owner("acme").await.unwrap();
    let campaign = tp
        .platform
        .tenant(&slug("acme"))
        .await
        .unwrap()
        .create_campaign(NewCampaign {
            name: "Empty".to_string(),
            kind: CampaignKind::Broadcast,
            timezone: "UTC".to_string(),
            message_template: "Hello".to_string(),
            segment_ids: vec![],
        })
        .await
        .unwrap();

    let summary = tp
        .platform
        .launcher
        .launch(&slug("acme"), campaign.id, false)
        .await
        .unwrap();

    assert_eq!(summary.total_customers, 0);
    assert!(summary.errors.is_empty());
    assert!(tp.provider.sent().is_empty());
}
