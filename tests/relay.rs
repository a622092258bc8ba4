use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use spa_sim::spa::{SpaCharacteristic, SpaDevice};
use spa_sim::{
    BleError, BleManager, RelayAction, RelayError, RelayEvent, RelayMessage, RelayTarget,
    dispatch, parse_message,
};
use tokio_stream::StreamExt;

const MAC: &str = "AA:BB:CC:DD:EE:02";

fn spa_manager() -> BleManager {
    let manager = BleManager::default();
    manager.attach_spa_device(SpaDevice::with_mac(MAC));
    manager
}

async fn collect_relay(
    events: &mut tokio_stream::wrappers::BroadcastStream<RelayMessage>,
) -> Vec<RelayMessage> {
    let mut collected = Vec::new();
    while let Ok(Some(Ok(message))) =
        tokio::time::timeout(Duration::from_millis(10), events.next()).await
    {
        collected.push(message);
    }
    collected
}

#[tokio::test]
async fn inbound_commands_drive_the_transport() -> anyhow::Result<()> {
    let manager = spa_manager();

    let connect = parse_message(&format!(
        r#"{{"event":"command","device":"{MAC}","characteristic":"CONNECT","value":"","timestamp":1}}"#
    ))?;
    assert_eq!(RelayAction::Connected, dispatch(&manager, &connect).await?);
    assert!(manager.is_connected(MAC));

    let write = RelayMessage::command(MAC, SpaCharacteristic::Temperature, "39");
    assert_eq!(
        RelayAction::Wrote(SpaCharacteristic::Temperature),
        dispatch(&manager, &write).await?
    );
    assert_eq!(
        Some("39".to_string()),
        manager
            .spa_device_state(MAC)
            .map(|state| state.value(SpaCharacteristic::Temperature).to_string())
    );

    let disconnect = RelayMessage::command(MAC, RelayTarget::Disconnect, "");
    assert_eq!(RelayAction::Disconnected, dispatch(&manager, &disconnect).await?);
    assert!(!manager.is_connected(MAC));

    Ok(())
}

#[tokio::test]
async fn writes_to_a_disconnected_spa_surface_transport_errors() {
    let manager = spa_manager();
    let write = RelayMessage::command(MAC, SpaCharacteristic::Time, "12:30");

    let result = dispatch(&manager, &write).await;

    assert_matches!(result, Err(RelayError::Ble(BleError::NotConnected { .. })));
}

#[tokio::test]
async fn state_changes_and_notifications_are_published() -> anyhow::Result<()> {
    let manager = spa_manager();
    let mut events = manager.relay_events();
    dispatch(&manager, &RelayMessage::command(MAC, RelayTarget::Connect, "")).await?;
    let _monitor = manager.monitor(
        &spa_sim::spa_key(MAC, SpaCharacteristic::Temperature),
        |_event| {},
    )?;

    dispatch(
        &manager,
        &RelayMessage::command(MAC, SpaCharacteristic::Temperature, "40"),
    )
    .await?;

    let published: Vec<(RelayEvent, Option<SpaCharacteristic>, Option<String>)> =
        collect_relay(&mut events)
            .await
            .into_iter()
            .filter(|message| message.characteristic() == Some(SpaCharacteristic::Temperature))
            .map(|message| {
                (
                    message.event(),
                    message.characteristic(),
                    message.value().map(str::to_string),
                )
            })
            .collect();
    assert_eq!(
        vec![
            (
                RelayEvent::StateChange,
                Some(SpaCharacteristic::Temperature),
                Some("40".to_string())
            ),
            (
                RelayEvent::Notification,
                Some(SpaCharacteristic::Temperature),
                Some("40".to_string())
            ),
        ],
        published
    );

    Ok(())
}
