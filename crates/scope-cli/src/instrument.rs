//! Simulated microscope actions.
//!
//! Every action sleeps through its context so cancellation lands promptly,
//! and hardware-facing actions mirror their effect into the state tree.

use std::time::Duration;

use anyhow::Result;
use scope_core::{
    ActionContext, ActionDefinition, ActionError, ActionRegistry, Callable, LogLevel, ParamSpec,
    ParamType, YieldStream,
};
use serde_json::{json, Map, Value};
use uuid::Uuid;

fn number(args: &Map<String, Value>, key: &str, fallback: f64) -> f64 {
    args.get(key).and_then(Value::as_f64).unwrap_or(fallback)
}

fn text<'a>(args: &'a Map<String, Value>, key: &str, fallback: &'a str) -> &'a str {
    args.get(key).and_then(Value::as_str).unwrap_or(fallback)
}

fn flag(args: &Map<String, Value>, key: &str) -> bool {
    args.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn seconds(secs: f64) -> Duration {
    Duration::from_secs_f64(secs.max(0.0))
}

async fn write_state(ctx: &ActionContext, path: &str, value: Value) -> Result<(), ActionError> {
    ctx.state
        .set(path, value)
        .await
        .map_err(|e| ActionError::failed(e.to_string()))
}

// ---------------------------------------------------------------------------
// Imaging
// ---------------------------------------------------------------------------

async fn capture_image(args: Map<String, Value>, ctx: ActionContext) -> Result<Value, ActionError> {
    let exposure = number(&args, "exposure_time", 0.1);
    ctx.sleep(seconds(exposure)).await?;
    let image_id = Uuid::new_v4().to_string();
    write_state(&ctx, "camera.last_image", json!(image_id)).await?;
    Ok(json!({
        "image_id": image_id,
        "exposure_time": exposure,
        "resolution": args.get("resolution").cloned().unwrap_or(json!([1024, 1024])),
        "channel": text(&args, "channel", "default"),
    }))
}

async fn acquire_z_stack(args: Map<String, Value>, ctx: ActionContext) -> Result<Value, ActionError> {
    let z_start = number(&args, "z_start", 0.0);
    let z_end = number(&args, "z_end", 10.0);
    let z_step = number(&args, "z_step", 1.0);
    let exposure = number(&args, "exposure_time", 0.1);
    if z_step <= 0.0 {
        return Err(ActionError::failed("z_step must be positive"));
    }

    let slices = ((z_end - z_start).abs() / z_step) as usize + 1;
    let direction = if z_end >= z_start { 1.0 } else { -1.0 };
    for slice in 0..slices {
        let z = z_start + direction * z_step * slice as f64;
        write_state(&ctx, "stage.z", json!(z)).await?;
        ctx.sleep(seconds(exposure)).await?;
        let percent = ((slice + 1) * 100 / slices) as u8;
        ctx.progress(percent, Some(&format!("slice {}/{slices}", slice + 1)))
            .await?;
    }

    Ok(json!({
        "stack_id": Uuid::new_v4().to_string(),
        "z_start": z_start,
        "z_end": z_end,
        "z_step": z_step,
        "num_slices": slices,
        "success": true,
    }))
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

async fn move_stage(args: Map<String, Value>, ctx: ActionContext) -> Result<Value, ActionError> {
    let relative = flag(&args, "relative");
    let speed = number(&args, "speed", 100.0);
    if speed <= 0.0 {
        return Err(ActionError::failed("speed must be positive"));
    }

    let current: Vec<f64> = match ctx.state.get("stage.position").await {
        Ok(Value::Array(coords)) => coords.iter().map(|c| c.as_f64().unwrap_or(0.0)).collect(),
        _ => vec![0.0, 0.0, 0.0],
    };
    let mut target = [0.0; 3];
    let mut distance: f64 = 0.0;
    for (i, axis) in ["x", "y", "z"].iter().enumerate() {
        let from = current.get(i).copied().unwrap_or(0.0);
        let requested = args.get(*axis).and_then(Value::as_f64);
        target[i] = match (requested, relative) {
            (Some(v), true) => from + v,
            (Some(v), false) => v,
            (None, _) => from,
        };
        distance = distance.max((target[i] - from).abs());
    }

    ctx.log(LogLevel::Info, format!("moving stage to {target:?}"))
        .await;
    ctx.sleep(seconds((distance / speed).min(2.0))).await?;
    write_state(&ctx, "stage.position", json!(target)).await?;

    Ok(json!({
        "position": target,
        "speed": speed,
        "relative": relative,
        "success": true,
    }))
}

async fn adjust_focus(args: Map<String, Value>, ctx: ActionContext) -> Result<Value, ActionError> {
    let z_offset = number(&args, "z_offset", 0.0);
    let method = text(&args, "method", "manual").to_string();
    if !matches!(method.as_str(), "manual" | "auto" | "continuous") {
        return Err(ActionError::failed(format!("unknown focus method '{method}'")));
    }
    ctx.sleep(Duration::from_millis(150)).await?;
    write_state(&ctx, "focus.offset", json!(z_offset)).await?;
    Ok(json!({
        "z_offset": z_offset,
        "method": method,
        "success": true,
    }))
}

async fn run_autofocus(args: Map<String, Value>, ctx: ActionContext) -> Result<Value, ActionError> {
    let method = text(&args, "method", "contrast").to_string();
    let range_um = number(&args, "range_um", 10.0);
    let steps = args.get("steps").and_then(Value::as_u64).unwrap_or(20).max(1);

    for step in 0..steps {
        ctx.sleep(Duration::from_millis(25)).await?;
        ctx.progress(((step + 1) * 100 / steps) as u8, None).await?;
    }
    let best = range_um / 20.0;
    write_state(&ctx, "focus.offset", json!(best)).await?;
    Ok(json!({
        "method": method,
        "range_um": range_um,
        "steps": steps,
        "best_focus_z": best,
        "success": true,
    }))
}

// ---------------------------------------------------------------------------
// Illumination
// ---------------------------------------------------------------------------

async fn set_laser_power(args: Map<String, Value>, ctx: ActionContext) -> Result<Value, ActionError> {
    let wavelength = args.get("wavelength").and_then(Value::as_u64).unwrap_or(488);
    let power = number(&args, "power", 50.0);
    let enabled = args.get("enabled").and_then(Value::as_bool).unwrap_or(true);
    ctx.sleep(Duration::from_millis(50)).await?;

    let laser = json!({"power": power, "enabled": enabled});
    write_state(&ctx, &format!("lasers.{wavelength}"), laser).await?;
    Ok(json!({
        "wavelength": wavelength,
        "power": power,
        "enabled": enabled,
        "success": true,
    }))
}

async fn set_illumination(args: Map<String, Value>, ctx: ActionContext) -> Result<Value, ActionError> {
    let source = text(&args, "source", "brightfield").to_string();
    let intensity = number(&args, "intensity", 50.0).clamp(0.0, 100.0);
    let enabled = args.get("enabled").and_then(Value::as_bool).unwrap_or(true);
    ctx.sleep(Duration::from_millis(50)).await?;

    let illumination = json!({"source": source, "intensity": intensity, "enabled": enabled});
    write_state(&ctx, "illumination", illumination.clone()).await?;
    let mut result = illumination;
    result["success"] = json!(true);
    Ok(result)
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

fn time_lapse(args: Map<String, Value>, ctx: ActionContext) -> YieldStream {
    let frames = args.get("num_frames").and_then(Value::as_u64).unwrap_or(10);
    let interval = number(&args, "interval", 1.0);
    let exposure = number(&args, "exposure_time", 0.1);

    YieldStream::spawn(move |y| async move {
        for frame in 0..frames {
            ctx.sleep(seconds(interval)).await?;
            y.send(json!({
                "frame_index": frame,
                "image_id": Uuid::new_v4().to_string(),
                "timestamp": frame as f64 * interval,
                "exposure_time": exposure,
            }))
            .await?;
        }
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Every simulated action, in the order they are listed to clients.
pub fn registry() -> Result<ActionRegistry> {
    let mut registry = ActionRegistry::new();

    registry.register(
        ActionDefinition::new("capture_image", Callable::single_shot(capture_image))
            .describe("Capture an image from the microscope camera.")
            .param(
                ParamSpec::optional("exposure_time", ParamType::Number, Some(json!(0.1)))
                    .describe("Exposure time in seconds"),
            )
            .param(
                ParamSpec::optional("resolution", ParamType::Array, None)
                    .describe("Resolution [width, height]"),
            )
            .param(
                ParamSpec::optional("channel", ParamType::String, Some(json!("default")))
                    .describe("Imaging channel"),
            )
            .tag("imaging")
            .tag("camera"),
    )?;

    registry.register(
        ActionDefinition::new("acquire_z_stack", Callable::single_shot(acquire_z_stack))
            .describe("Acquire a Z-stack of images, reporting progress per slice.")
            .param(ParamSpec::optional("z_start", ParamType::Number, Some(json!(0.0))))
            .param(ParamSpec::optional("z_end", ParamType::Number, Some(json!(10.0))))
            .param(ParamSpec::optional("z_step", ParamType::Number, Some(json!(1.0))))
            .param(ParamSpec::optional("exposure_time", ParamType::Number, Some(json!(0.1))))
            .tag("imaging")
            .tag("z-stack")
            .tag("3d"),
    )?;

    registry.register(
        ActionDefinition::new("move_stage", Callable::single_shot(move_stage))
            .describe("Move the microscope stage to a position.")
            .param(ParamSpec::optional("x", ParamType::Number, None).describe("X position"))
            .param(ParamSpec::optional("y", ParamType::Number, None).describe("Y position"))
            .param(ParamSpec::optional("z", ParamType::Number, None).describe("Z position"))
            .param(
                ParamSpec::optional("speed", ParamType::Number, Some(json!(100.0)))
                    .describe("Movement speed in µm/s"),
            )
            .param(
                ParamSpec::optional("relative", ParamType::Bool, Some(json!(false)))
                    .describe("Move relative to the current position"),
            )
            .tag("stage")
            .tag("motion"),
    )?;

    registry.register(
        ActionDefinition::new("adjust_focus", Callable::single_shot(adjust_focus))
            .describe("Adjust the microscope focus.")
            .param(ParamSpec::optional("z_offset", ParamType::Number, Some(json!(0.0))))
            .param(
                ParamSpec::optional("method", ParamType::String, Some(json!("manual")))
                    .describe("manual, auto or continuous"),
            )
            .tag("stage")
            .tag("focus"),
    )?;

    registry.register(
        ActionDefinition::new("run_autofocus", Callable::single_shot(run_autofocus))
            .describe("Run the autofocus routine.")
            .param(ParamSpec::optional("method", ParamType::String, Some(json!("contrast"))))
            .param(ParamSpec::optional("range_um", ParamType::Number, Some(json!(10.0))))
            .param(ParamSpec::optional("steps", ParamType::Integer, Some(json!(20))))
            .tag("focus")
            .tag("autofocus"),
    )?;

    registry.register(
        ActionDefinition::new("set_laser_power", Callable::single_shot(set_laser_power))
            .describe("Set the power of one laser line.")
            .param(
                ParamSpec::optional("wavelength", ParamType::Integer, Some(json!(488)))
                    .describe("Laser wavelength in nm"),
            )
            .param(
                ParamSpec::optional("power", ParamType::Number, Some(json!(50.0)))
                    .describe("Power level in mW"),
            )
            .param(ParamSpec::optional("enabled", ParamType::Bool, Some(json!(true))))
            .tag("laser")
            .tag("illumination")
            .concurrency(4),
    )?;

    registry.register(
        ActionDefinition::new("set_illumination", Callable::single_shot(set_illumination))
            .describe("Set the illumination source and intensity.")
            .param(ParamSpec::optional("source", ParamType::String, Some(json!("brightfield"))))
            .param(
                ParamSpec::optional("intensity", ParamType::Number, Some(json!(50.0)))
                    .describe("Intensity level (0-100)"),
            )
            .param(ParamSpec::optional("enabled", ParamType::Bool, Some(json!(true))))
            .tag("illumination"),
    )?;

    registry.register(
        ActionDefinition::new("time_lapse", Callable::streaming(time_lapse))
            .describe("Acquire time-lapse images, yielding each frame as it is captured.")
            .param(ParamSpec::optional("num_frames", ParamType::Integer, Some(json!(10))))
            .param(
                ParamSpec::optional("interval", ParamType::Number, Some(json!(1.0)))
                    .describe("Seconds between frames"),
            )
            .param(ParamSpec::optional("exposure_time", ParamType::Number, Some(json!(0.1))))
            .tag("imaging")
            .tag("time-lapse"),
    )?;

    Ok(registry)
}
