//! Engine argument vectors, one layout per preset.

use std::ffi::OsString;
use std::path::Path;

use crate::captions;
use crate::config::{EncodeSettings, Preset};
use crate::error::{Error, Result};
use crate::types::Job;

/// Full argument vector for `job`, output path last.
///
/// `sidecar` is the caption file for [`Preset::BurnCaptions`] and is ignored
/// by the other presets.
pub fn build_args(job: &Job, sidecar: Option<&Path>) -> Result<Vec<OsString>> {
    let mut args: Vec<OsString> = vec!["-nostdin".into(), "-y".into()];
    // Seeking before -i keeps stream copies fast.
    if let Some(clip) = &job.clip {
        args.push("-ss".into());
        args.push(clip.start_seconds.to_string().into());
    }
    args.push("-i".into());
    args.push(job.input_path.clone().into_os_string());

    let params = &job.parameters;
    match params.preset {
        Preset::VerticalBlur => {
            args.push("-filter_complex".into());
            args.push(blur_filter(&params.encode).into());
            push_all(&mut args, &["-c:a", "copy", "-movflags", "+faststart", "-preset"]);
            args.push(params.encode.speed.clone().into());
            args.push("-crf".into());
            args.push(params.encode.crf.to_string().into());
        }
        Preset::CropScale => {
            args.push("-vf".into());
            args.push(crop_filter(&params.encode).into());
            push_all(&mut args, &["-c:v", "libx264", "-preset"]);
            args.push(params.encode.speed.clone().into());
            push_all(
                &mut args,
                &["-b:v", "5000k", "-c:a", "aac", "-b:a", "192k", "-movflags", "+faststart", "-shortest"],
            );
        }
        Preset::BurnCaptions => {
            let sidecar = sidecar.ok_or_else(|| {
                Error::InvalidOption("burning captions needs a caption sidecar".into())
            })?;
            let style = params.captions.clone().unwrap_or_default();
            args.push("-vf".into());
            args.push(captions::subtitles_filter(sidecar, &style)?.into());
            push_all(&mut args, &["-c:a", "copy"]);
        }
        Preset::Clips { .. } => {
            let clip = job
                .clip
                .ok_or_else(|| Error::InvalidOption("clip jobs need a clip span".into()))?;
            if let Some(length) = clip.length_seconds {
                args.push("-t".into());
                args.push(length.to_string().into());
            }
            push_all(&mut args, &["-c", "copy"]);
        }
    }

    args.push(job.output_path.clone().into_os_string());
    Ok(args)
}

fn push_all(args: &mut Vec<OsString>, items: &[&str]) {
    args.extend(items.iter().map(OsString::from));
}

/// Blurred, scaled-up background with the scaled-down original centred on top.
fn blur_filter(encode: &EncodeSettings) -> String {
    let (w, h) = (encode.width, encode.height);
    format!(
        "[0:v]scale={w}:{h}:force_original_aspect_ratio=increase,boxblur=20:5[bg];\
         [0:v]scale={w}:{h}:force_original_aspect_ratio=decrease[fg];\
         [bg][fg]overlay=(W-w)/2:(H-h)/2,crop={w}:{h}"
    )
}

fn crop_filter(encode: &EncodeSettings) -> String {
    let (w, h) = (encode.width, encode.height);
    format!("scale=-2:{h},crop='if(gt(iw,{w}),{w},iw)':{h}")
}
