use std::sync::Arc;

use wlx_outputs::{
    ActionQueue, BindingId, ConfigurationAction, DisplayConfig,
    HorizontalAnchor, VerticalAnchor, WlPosition, WlRect, WlResolution,
    WlTransform, calculate,
    meta_head::MetaHead,
    plan::{HeadDirective, ModeSelection, TransactionPlan},
    proxy::{HeadChange, ModeChange},
};

struct Output<'a> {
    binding: u32,
    name: &'a str,
    serial: &'a str,
    modes: &'a [(i32, i32, i32)],
}

fn attach(output: Output) -> MetaHead {
    let mut head =
        MetaHead::new(BindingId(output.binding), Arc::from("test-machine"));
    head.apply(HeadChange::Name(output.name.into()));
    head.apply(HeadChange::SerialNumber(output.serial.into()));
    head.apply(HeadChange::Enabled(true));
    for (i, (width, height, mhz)) in output.modes.iter().enumerate() {
        let mode = BindingId(output.binding * 100 + i as u32);
        head.apply(HeadChange::ModeAdded(mode));
        let size = WlResolution::new(*width, *height);
        head.apply_mode(mode, ModeChange::Size(size));
        head.apply_mode(mode, ModeChange::Refresh(*mhz));
        if i == 0 {
            head.apply(HeadChange::CurrentMode(mode));
        }
    }
    head
}

fn desk() -> Vec<MetaHead> {
    vec![
        attach(Output {
            binding: 1,
            name: "eDP-1",
            serial: "LAPTOP",
            modes: &[(1920, 1200, 60000)],
        }),
        attach(Output {
            binding: 2,
            name: "DP-1",
            serial: "CENTER",
            modes: &[(2560, 1440, 59951), (1920, 1080, 60000)],
        }),
        attach(Output {
            binding: 3,
            name: "DP-2",
            serial: "SIDE",
            modes: &[(1920, 1080, 60000)],
        }),
    ]
}

#[test]
fn rotated_side_screen_next_to_center() {
    let heads = desk();
    let mut queue = ActionQueue::new();
    queue.add(ConfigurationAction::right_of("CENTER", "LAPTOP"));
    queue.add(ConfigurationAction::right_of("SIDE", "CENTER"));
    queue.add(ConfigurationAction::transform("SIDE", WlTransform::Rotate90));
    queue.add(ConfigurationAction::primary("CENTER"));

    let result = calculate(&heads, &queue);
    assert!(result.unresolved().is_empty());
    assert_eq!(
        result.output_state("SIDE").unwrap().position,
        WlPosition::new(1920 + 2560, 0)
    );
    assert_eq!(
        result.global_space(),
        WlRect {
            x: 0,
            y: 0,
            width: 1920 + 2560 + 1080,
            height: 1920
        }
    );
    assert_eq!(result.primary(), Some("CENTER"));

    let plan = TransactionPlan::from_calculation(&result, &heads).unwrap();
    let side = &plan.entry("SIDE").unwrap().directive;
    let HeadDirective::Enable(side) = side else {
        panic!("SIDE should stay enabled");
    };
    assert_eq!(side.transform, WlTransform::Rotate90);
    assert_eq!(side.mode, Some(ModeSelection::Existing(BindingId(300))));
}

#[test]
fn laptop_closed_and_screens_stacked() {
    let heads = desk();
    let mut queue = ActionQueue::new();
    queue.add(ConfigurationAction::scale("LAPTOP", 1.5));
    queue.add(ConfigurationAction::explicit_off("LAPTOP"));
    queue.add(ConfigurationAction::mode("CENTER", 1920, 1080, 60.0));
    queue.add(ConfigurationAction::position_anchor(
        "SIDE",
        "CENTER",
        HorizontalAnchor::Center,
        VerticalAnchor::Above,
    ));

    // Turning the laptop off dropped its scale change
    assert_eq!(queue.for_output("LAPTOP").count(), 1);

    let result = calculate(&heads, &queue);
    assert_eq!(result.len(), 3);
    assert!(!result.output_state("LAPTOP").unwrap().on);
    assert_eq!(
        result.output_state("CENTER").unwrap().position,
        WlPosition::new(0, 0)
    );
    assert_eq!(
        result.output_state("SIDE").unwrap().position,
        WlPosition::new(0, -1080)
    );

    let plan = TransactionPlan::from_calculation(&result, &heads).unwrap();
    assert_eq!(plan.entry("LAPTOP").unwrap().directive, HeadDirective::Disable);
    let center = &plan.entry("CENTER").unwrap().directive;
    let HeadDirective::Enable(center) = center else {
        panic!("CENTER should stay enabled");
    };
    assert_eq!(center.mode, Some(ModeSelection::Existing(BindingId(201))));
}

#[test]
fn applied_layout_is_recorded_and_restored() {
    let heads = desk();
    let mut queue = ActionQueue::new();
    queue.add(ConfigurationAction::mirror_of("SIDE", "LAPTOP"));
    queue.add(ConfigurationAction::position_anchor(
        "CENTER",
        "LAPTOP",
        HorizontalAnchor::None,
        VerticalAnchor::Bottom,
    ));
    let result = calculate(&heads, &queue);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("display-config.toml");
    let mut config = DisplayConfig::default();
    config.record_calculation(&result);
    config.save(&path).unwrap();

    let reloaded = DisplayConfig::load(&path).unwrap();
    let group = reloaded
        .matching_group(["SIDE", "CENTER", "LAPTOP"])
        .unwrap();
    assert_eq!(group.name, "CENTER, LAPTOP, SIDE (Auto Generated)");

    let mut fresh = desk();
    group.restore_onto(fresh.iter_mut());
    let center = fresh.iter().find(|h| h.identifier() == "CENTER").unwrap();
    assert_eq!(center.relative_output(), Some("LAPTOP"));
    assert_eq!(center.vertical_anchor(), VerticalAnchor::Bottom);

    // Anchors survive, so the same layout comes out without queued actions
    let again = calculate(&fresh, &ActionQueue::new());
    assert_eq!(
        again.output_state("CENTER").unwrap().position,
        result.output_state("CENTER").unwrap().position
    );
    assert_eq!(
        again.output_state("CENTER").unwrap().position,
        WlPosition::new(1920, 1200 - 1440)
    );

    let plan = TransactionPlan::from_group(group, &fresh).unwrap();
    let side = &plan.entry("SIDE").unwrap().directive;
    let HeadDirective::Enable(side) = side else {
        panic!("SIDE should stay enabled");
    };
    assert_eq!(side.position, WlPosition::new(0, 0));
}
