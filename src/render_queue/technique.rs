//! Render techniques: the closed set of shader configurations the queue batches by

use crate::backend::types::PrimitiveTopology;

/// Shader configuration an instance is rendered with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RenderTechnique {
    /// Standard lit geometry
    Light,
    /// Lit geometry with a highlight colour held in the instance parameters
    LightHighlight,
    /// Alpha-faded lit geometry; requires back-to-front ordering
    LightFade,
    /// Alpha-faded and highlighted; requires back-to-front ordering
    LightHighlightFade,
    /// Unlit flat highlight with alpha fade
    LightFlatHighlightFade,
    /// Volumetric line rendering
    VolLine,
}

impl RenderTechnique {
    pub const COUNT: usize = 6;

    pub const ALL: [RenderTechnique; Self::COUNT] = [
        RenderTechnique::Light,
        RenderTechnique::LightHighlight,
        RenderTechnique::LightFade,
        RenderTechnique::LightHighlightFade,
        RenderTechnique::LightFlatHighlightFade,
        RenderTechnique::VolLine,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn name(&self) -> &'static str {
        match self {
            RenderTechnique::Light => "LightShader",
            RenderTechnique::LightHighlight => "LightHighlightShader",
            RenderTechnique::LightFade => "LightFadeShader",
            RenderTechnique::LightHighlightFade => "LightHighlightFadeShader",
            RenderTechnique::LightFlatHighlightFade => "LightFlatHighlightFadeShader",
            RenderTechnique::VolLine => "VolLineShader",
        }
    }

    /// Must be drawn back-to-front through the z-sorted path
    pub fn requires_zsort(&self) -> bool {
        matches!(
            self,
            RenderTechnique::LightFade
                | RenderTechnique::LightHighlightFade
                | RenderTechnique::LightFlatHighlightFade
        )
    }

    pub fn requires_alpha_blending(&self) -> bool {
        self.requires_zsort() || matches!(self, RenderTechnique::VolLine)
    }

    /// Opaque techniques write into the GBuffer; blended ones render in the transparency pass
    pub fn is_deferred(&self) -> bool {
        !self.requires_alpha_blending()
    }

    pub fn topology(&self) -> PrimitiveTopology {
        match self {
            RenderTechnique::VolLine => PrimitiveTopology::LineList,
            _ => PrimitiveTopology::TriangleList,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_are_dense() {
        for (i, technique) in RenderTechnique::ALL.iter().enumerate() {
            assert_eq!(technique.index(), i);
        }
    }

    #[test]
    fn fade_techniques_are_sorted_and_blended() {
        assert!(RenderTechnique::LightFade.requires_zsort());
        assert!(RenderTechnique::LightFade.requires_alpha_blending());
        assert!(!RenderTechnique::Light.requires_zsort());
        assert!(RenderTechnique::Light.is_deferred());
        assert!(!RenderTechnique::VolLine.is_deferred());
        assert_eq!(
            RenderTechnique::VolLine.topology(),
            PrimitiveTopology::LineList
        );
    }
}
