//! ALSA PCM open/negotiate helpers shared by the playback sink and the capture source.

use alsa::pcm::{Access, Format, Frames, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result, bail};

/// Periods kept in the hardware ring buffer.
const PERIODS_PER_BUFFER: usize = 4;

/// What the hardware actually agreed to.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    pub sample_rate: u32,
    pub channels: u32,
    /// Frames per period
    pub period_size: usize,
    pub buffer_size: usize,
}

/// Requested shape of a PCM stream; always interleaved S16LE.
#[derive(Debug, Clone)]
pub struct PcmRequest<'a> {
    pub device: &'a str,
    pub sample_rate: u32,
    pub channels: u32,
    /// 0 lets ALSA pick
    pub period_size: usize,
}

/// Open `request.device` for playback. The rate must be honoured exactly since
/// the renderer clocks track position at that rate.
pub fn open_playback(request: &PcmRequest<'_>) -> Result<(PCM, AlsaParams)> {
    let (pcm, params) = open_pcm(request, Direction::Playback)?;
    if params.sample_rate != request.sample_rate {
        bail!(
            "Playback device '{}' runs at {} Hz, engine needs {} Hz",
            request.device,
            params.sample_rate,
            request.sample_rate
        );
    }
    Ok((pcm, params))
}

/// Open `request.device` for mono capture. The negotiated rate is reported back
/// to the caller as-is.
pub fn open_capture(request: &PcmRequest<'_>) -> Result<(PCM, AlsaParams)> {
    open_pcm(request, Direction::Capture)
}

fn open_pcm(request: &PcmRequest<'_>, direction: Direction) -> Result<(PCM, AlsaParams)> {
    let dir_name = match direction {
        Direction::Playback => "Playback",
        Direction::Capture => "Capture",
    };
    let pcm = PCM::new(request.device, direction, false).with_context(|| {
        format!("Failed to open PCM device '{}' for {}", request.device, dir_name)
    })?;

    {
        let hwp = HwParams::any(&pcm).context("Failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(request.channels)
            .with_context(|| format!("{} channels not supported", request.channels))?;
        hwp.set_rate_near(request.sample_rate, ValueOr::Nearest)?;
        if request.period_size > 0 {
            hwp.set_period_size_near(request.period_size as Frames, ValueOr::Nearest)?;
            hwp.set_buffer_size_near((request.period_size * PERIODS_PER_BUFFER) as Frames)?;
        }
        pcm.hw_params(&hwp)
            .with_context(|| format!("Failed to apply {} hardware parameters", dir_name))?;
    }

    let params = {
        let hwp = pcm.hw_params_current()?;
        AlsaParams {
            sample_rate: hwp.get_rate()?,
            channels: hwp.get_channels()?,
            period_size: hwp.get_period_size()? as usize,
            buffer_size: hwp.get_buffer_size()? as usize,
        }
    };

    log::info!(
        "ALSA {}: device={}, rate={}, channels={}, period_size={}, buffer_size={}",
        dir_name,
        request.device,
        params.sample_rate,
        params.channels,
        params.period_size,
        params.buffer_size,
    );

    Ok((pcm, params))
}
