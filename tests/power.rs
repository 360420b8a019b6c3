//! Bounded waits: readiness, power sequencing and frame presentation, with the
//! coprocessor answering from its own thread.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#![cfg(feature = "async")]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use dcp_rpc::Error;
use dcp_rpc::channel::Context;
use dcp_rpc::io::DisplayMode;
use dcp_rpc::proto::{
    BACKGROUND_BLACK, LayerMask, Rect, SetParameterDcp, SetPowerStateReq, Surface,
    SwapStartResp, SwapSubmitReq, SwapSubmitResp,
};
use dcp_rpc::swap::{FlushRequest, Layer};
use dcp_rpc::wire::Wire;
use pollster::block_on;

const SWAP_ID: u32 = 42;

/// Answers every call successfully
fn cooperative(call: &Call) -> Vec<u8> {
    match &call.tag {
        b"A407" => SwapStartResp {
            swap_id: SWAP_ID,
            ..Default::default()
        }
        .to_bytes(),
        b"A408" => SwapSubmitResp::default().to_bytes(),
        _ => Vec::new(),
    }
}

fn external_display(notch_height: u32) -> Arc<TestDcp> {
    let mut config = config();
    config.notch_height = notch_height;
    let dcp = new_dcp(config);
    start(&dcp, 0);
    callback(&dcp, Context::Cb, 0, b"D576", &1u64.to_le_bytes(), 0).unwrap();
    expect_ack(&dcp, Context::Cb);
    Arc::new(dcp)
}

fn mode() -> DisplayMode {
    DisplayMode {
        width: 1920,
        height: 1080,
        refresh: 60 << 16,
        timing_mode_id: 5,
        color_mode_id: 9,
    }
}

fn layer() -> Layer {
    Layer {
        surface: Surface {
            stride: 1920 * 4,
            width: 1920,
            height: 1080,
            buf_size: 1920 * 4 * 1080,
            ..Default::default()
        },
        iova: 0x1_2000_0000,
        src: Rect {
            x: 0,
            y: 0,
            w: 1920,
            h: 1080,
        },
        dst: Rect {
            x: 0,
            y: 10,
            w: 1920,
            h: 1070,
        },
    }
}

#[test]
fn wait_ready_after_start() {
    let dcp = new_dcp(config());
    let waiter = Waiter::new();
    assert_eq!(block_on(dcp.wait_ready(&waiter, Some(5))), Err(Error::Timeout));
    start(&dcp, 1);
    assert_eq!(block_on(dcp.wait_ready(&waiter, Some(5))), Ok(()));
}

#[test]
fn wait_ready_fails_fast_once_crashed() {
    let dcp = new_dcp(config());
    dcp.crashed();
    let waiter = Waiter::new();
    assert_eq!(block_on(dcp.wait_ready(&waiter, None)), Err(Error::Crashed));
}

#[test]
fn poweron_external_display() {
    let dcp = Arc::new(new_dcp(config()));
    let responder = Responder::spawn(dcp.clone(), cooperative);

    let waiter = Waiter::new();
    assert_eq!(block_on(dcp.poweron(&waiter)), Ok(()));

    let calls = responder.stop();
    let tags: Vec<_> = calls.iter().map(|c| c.tag).collect();
    assert_eq!(tags, vec![*b"A410", *b"A439", *b"A468"]);
    assert_eq!(calls[0].input, 2u32.to_le_bytes());
    let param = SetParameterDcp::from_bytes(&calls[1].input).unwrap();
    assert_eq!(param.param, 14);
    assert_eq!(param.count, 1);
    assert_eq!(param.value[0], 0);
    let power = SetPowerStateReq::from_bytes(&calls[2].input).unwrap();
    assert_eq!(power.unklong, 1);

    assert!(dcp.display_state().brightness.update);
}

#[test]
fn poweron_main_display_skips_parameter() {
    let mut config = config();
    config.main_display = true;
    let dcp = Arc::new(new_dcp(config));
    let responder = Responder::spawn(dcp.clone(), cooperative);

    let waiter = Waiter::new();
    assert_eq!(block_on(dcp.poweron(&waiter)), Ok(()));

    let calls = responder.stop();
    let tags: Vec<_> = calls.iter().map(|c| c.tag).collect();
    assert_eq!(tags, vec![*b"A410", *b"A468"]);
    assert_eq!(calls[0].input, 0u32.to_le_bytes());
}

#[test]
fn poweron_timeout_is_not_fatal() {
    let dcp = new_dcp(config());
    let waiter = Waiter::new();
    // Nobody answers
    assert_eq!(block_on(dcp.poweron(&waiter)), Ok(()));
    assert!(!dcp.is_crashed());
    assert!(dcp.display_state().brightness.update);
}

#[test]
fn crash_fails_pending_wait() {
    let dcp = Arc::new(new_dcp(config()));
    let crasher = {
        let dcp = dcp.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            dcp.crashed();
        })
    };

    let waiter = Waiter::new();
    assert_eq!(block_on(dcp.poweron(&waiter)), Err(Error::Crashed));
    crasher.join().unwrap();
    assert_eq!(dcp.platform().hotplugs(), vec![false]);
}

#[test]
fn poweroff_clears_then_powers_down() {
    let dcp = Arc::new(new_dcp(config()));
    let responder = Responder::spawn(dcp.clone(), cooperative);

    let waiter = Waiter::new();
    assert_eq!(block_on(dcp.poweroff(&waiter)), Ok(()));

    let calls = responder.stop();
    let tags: Vec<_> = calls.iter().map(|c| c.tag).collect();
    assert_eq!(tags, vec![*b"A407", *b"A408", *b"A468"]);

    let clear = SwapSubmitReq::from_bytes(&calls[1].input).unwrap();
    assert_eq!(clear.swap.swap_id, SWAP_ID);
    assert_eq!(
        clear.swap.swap_enabled,
        LayerMask::SET_BACKGROUND | LayerMask::ALL_SURFACES
    );
    assert_eq!(clear.swap.swap_completed, clear.swap.swap_enabled);
    assert_eq!(clear.swap.bg_color, BACKGROUND_BLACK);
    assert_eq!(clear.swap.bl_unk, 1);
    assert_eq!(clear.swap.bl_power, 0);
    assert!(clear.surf_null.iter().all(|&n| n));

    let power = SetPowerStateReq::from_bytes(&calls[2].input).unwrap();
    assert_eq!(power.unklong, 0);
    assert!(!dcp.is_crashed());
}

#[test]
fn poweroff_without_clear_marks_crashed() {
    let dcp = new_dcp(config());
    let waiter = Waiter::new();
    assert_eq!(block_on(dcp.poweroff(&waiter)), Err(Error::Timeout));
    assert!(dcp.is_crashed());
}

#[test]
fn first_flush_modesets_and_clears() {
    let dcp = external_display(74);
    let responder = Responder::spawn(dcp.clone(), cooperative);

    let request = FlushRequest {
        planes: vec![Some(layer())],
        mode: Some(mode()),
        enabled: true,
        active: true,
        planes_changed: true,
        ..Default::default()
    };
    let waiter = Waiter::new();
    assert_eq!(block_on(dcp.flush(&waiter, &request)), Ok(()));
    responder.wait_for_calls(3);
    let calls = responder.stop();

    let tags: Vec<_> = calls.iter().map(|c| c.tag).collect();
    assert_eq!(tags, vec![*b"A412", *b"A407", *b"A408"]);
    // color_mode_id, then timing_mode_id
    assert_eq!(calls[0].input[..4], 9u32.to_le_bytes());
    assert_eq!(calls[0].input[4..], 5u32.to_le_bytes());
    assert!(dcp.display_state().valid_mode);

    let swap = SwapSubmitReq::from_bytes(&calls[2].input).unwrap();
    assert_eq!(swap.swap.swap_id, SWAP_ID);
    assert_eq!(
        swap.swap.swap_enabled,
        LayerMask::SET_BACKGROUND | LayerMask::ALL_SURFACES
    );
    assert_eq!(swap.swap.swap_completed, swap.swap.swap_enabled);
    assert_eq!(swap.surf_null, [true, false, true, true]);
    assert_eq!(swap.surf_iova[1], 0x1_2000_0000);
    assert_eq!(swap.swap.dst_rect[1].y, 10 + 74);
    assert_eq!(swap.surf[1].width, 1920);
    assert_eq!(swap.clear, 0);
    assert_eq!(dcp.platform().vblanks(), 0);

    let state = dcp.swap_state();
    assert!(state.surfaces_cleared);
    assert_eq!(state.last_swap_id, SWAP_ID);
}

#[test]
fn later_flush_touches_only_its_planes() {
    let dcp = external_display(0);
    let responder = Responder::spawn(dcp.clone(), cooperative);
    let waiter = Waiter::new();

    let request = FlushRequest {
        planes: vec![None, Some(layer())],
        mode: Some(mode()),
        enabled: true,
        active: true,
        ..Default::default()
    };
    assert_eq!(block_on(dcp.flush(&waiter, &request)), Ok(()));
    responder.wait_for_calls(3);
    dcp.set_brightness(300);
    assert_eq!(block_on(dcp.flush(&waiter, &request)), Ok(()));
    responder.wait_for_calls(5);
    let calls = responder.stop();

    // No second modeset
    let tags: Vec<_> = calls.iter().map(|c| c.tag).collect();
    assert_eq!(
        tags,
        vec![*b"A412", *b"A407", *b"A408", *b"A407", *b"A408"]
    );
    let swap = SwapSubmitReq::from_bytes(&calls[4].input).unwrap();
    assert_eq!(
        swap.swap.swap_enabled,
        LayerMask::SURFACE_1 | LayerMask::SURFACE_2
    );
    assert_eq!(swap.surf_null, [true, true, false, true]);
    assert_eq!(swap.swap.bl_unk, 1);
    assert_eq!(swap.swap.bl_value, 300);
    assert_eq!(swap.swap.bl_power, 0x40);
    assert!(!dcp.display_state().brightness.update);
}

#[test]
fn idle_flush_only_signals_frame() {
    let dcp = external_display(0);
    let responder = Responder::spawn(dcp.clone(), cooperative);
    let waiter = Waiter::new();

    let request = FlushRequest {
        mode: Some(mode()),
        enabled: true,
        active: true,
        ..Default::default()
    };
    assert_eq!(block_on(dcp.flush(&waiter, &request)), Ok(()));
    let calls = responder.stop();
    let tags: Vec<_> = calls.iter().map(|c| c.tag).collect();
    assert_eq!(tags, vec![*b"A412"]);
    assert_eq!(dcp.platform().vblanks(), 1);
}

#[test]
fn disabled_pipe_gets_black_background() {
    let dcp = external_display(0);
    let responder = Responder::spawn(dcp.clone(), cooperative);
    let waiter = Waiter::new();

    let request = FlushRequest {
        mode: Some(mode()),
        ..Default::default()
    };
    assert_eq!(block_on(dcp.flush(&waiter, &request)), Ok(()));
    responder.wait_for_calls(3);
    let calls = responder.stop();
    let swap = SwapSubmitReq::from_bytes(&calls[2].input).unwrap();
    assert!(swap.swap.swap_enabled.contains(LayerMask::SET_BACKGROUND));
    assert_eq!(swap.swap.bg_color, BACKGROUND_BLACK);
    assert_eq!(swap.clear, 1);
}

#[test]
fn flush_while_busy_signals_frame() {
    let dcp = external_display(0);
    // Leave a command outstanding
    dcp.send_call(false, dcp_rpc::proto::Method::FirstClientOpen, &[], 0, None)
        .unwrap();

    let waiter = Waiter::new();
    let request = FlushRequest {
        planes: vec![Some(layer())],
        mode: Some(mode()),
        ..Default::default()
    };
    assert_eq!(
        block_on(dcp.flush(&waiter, &request)),
        Err(Error::ChannelBusy)
    );
    assert_eq!(dcp.platform().vblanks(), 1);
    assert!(!dcp.swap_state().surfaces_cleared);
}

#[test]
fn modeset_timeout_signals_frame() {
    let dcp = external_display(0);
    let waiter = Waiter::new();
    let request = FlushRequest {
        planes: vec![Some(layer())],
        mode: Some(mode()),
        ..Default::default()
    };
    assert_eq!(block_on(dcp.flush(&waiter, &request)), Err(Error::Timeout));
    assert_eq!(dcp.platform().vblanks(), 1);
    assert!(!dcp.display_state().valid_mode);
}

#[test]
fn modeset_without_mode_signals_frame() {
    let dcp = external_display(0);
    let waiter = Waiter::new();
    let request = FlushRequest::default();
    assert_eq!(block_on(dcp.flush(&waiter, &request)), Err(Error::NotReady));
    assert_eq!(dcp.platform().vblanks(), 1);
    assert_eq!(dcp.platform().pending_doorbells(), 0);
}

#[test]
fn disconnected_display_gets_no_swap() {
    let dcp = Arc::new(new_dcp(config()));
    let responder = Responder::spawn(dcp.clone(), cooperative);
    let waiter = Waiter::new();
    dcp.set_brightness(300);

    let request = FlushRequest {
        planes: vec![Some(layer())],
        mode: Some(mode()),
        ..Default::default()
    };
    assert_eq!(block_on(dcp.flush(&waiter, &request)), Ok(()));
    let calls = responder.stop();
    let tags: Vec<_> = calls.iter().map(|c| c.tag).collect();
    assert_eq!(tags, vec![*b"A412"]);
    assert_eq!(dcp.platform().vblanks(), 1);
    // Kept for the first swap once connected
    let brightness = dcp.display_state().brightness;
    assert!(brightness.update);
    assert_eq!(brightness.dac, 300);
}
